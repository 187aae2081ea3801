use memsim::{
    config::{LevelConfig, SimConfig},
    handshake::{Request, RequestError},
    memory::{Addr, WordStorage},
    sim::Simulator,
};

fn sim() -> Simulator<memsim::memory::PagedMemory> {
    Simulator::new(&SimConfig::default()).unwrap()
}

#[test]
fn write_then_read_back() {
    let mut sim = sim();
    sim.issue(Request::write(Addr::new(0x00000000), 0x12345678))
        .unwrap();
    let c = sim.issue(Request::read(Addr::new(0x00000000))).unwrap();
    assert_eq!(Some(0x12345678), c.read_data());
}

#[test]
fn write_then_read_back_second_page() {
    let mut sim = sim();
    sim.issue(Request::write(Addr::new(0x00001000), 0x87654321))
        .unwrap();
    let c = sim.issue(Request::read(Addr::new(0x00001000))).unwrap();
    assert_eq!(Some(0x87654321), c.read_data());
}

#[test]
fn first_read_misses_and_fills_every_level() {
    let mut sim = sim();
    let addr = Addr::new(0x00001000);
    let c = sim.issue(Request::read(addr)).unwrap();
    assert_eq!(Some(0), c.read_data());
    assert_eq!(100, c.cycles());
    for level in sim.hierarchy().levels() {
        assert_eq!(Some(0), level.probe(addr));
    }
    let c = sim.issue(Request::read(addr)).unwrap();
    assert_eq!(2, c.cycles());
}

#[test]
fn simultaneous_read_write_is_rejected() {
    let mut sim = sim();
    sim.issue(Request::write(Addr::new(0), 0x12345678)).unwrap();
    sim.issue(Request::read(Addr::new(0))).unwrap();
    let c = sim
        .issue(Request::read_write(Addr::new(0), 0xdeadbeef))
        .unwrap();
    assert_eq!(Some(RequestError::ProtocolViolation), c.fault());
    assert!(c.tick.ready);
    assert_eq!(0x12345678, c.tick.read_data);
    assert_eq!(
        0x12345678,
        sim.hierarchy().storage().read_word(Addr::new(0)).unwrap()
    );
    let c = sim.issue(Request::read(Addr::new(0))).unwrap();
    assert_eq!(Some(0x12345678), c.read_data());
}

#[test]
fn cached_and_uncached_reads_agree() {
    let config = SimConfig {
        levels: vec![
            LevelConfig::new(64, 16, 1),
            LevelConfig::new(256, 32, 2),
            LevelConfig::new(1024, 64, 4),
        ],
        miss_cycles: 30,
        ..Default::default()
    };
    let mut sim = Simulator::new(&config).unwrap();
    let mut seed = 0x2545f491u32;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed
    };
    for _ in 0..2000 {
        let addr = Addr::new((next() % 0x2000) & !3);
        if next() % 3 == 0 {
            let val = next();
            sim.issue(Request::write(addr, val)).unwrap();
            assert_eq!(val, sim.hierarchy().storage().read_word(addr).unwrap());
        } else {
            let c = sim.issue(Request::read(addr)).unwrap();
            let stored = sim.hierarchy().storage().read_word(addr).unwrap();
            assert_eq!(Some(stored), c.read_data(), "read {addr}");
        }
    }
}
