//! Direct-mapped, write-through cache hierarchy.
//!
//! Every level keeps `capacity / line_size` slots. An address maps to slot
//! `(addr / line_size) % num_lines` and its tag is the full line number
//! `addr / line_size`. Reads probe outermost first and fill every level on a full
//! miss; writes update every level and then the backing store.

use crate::{
    config::{self, ConfigError, LevelConfig, SimConfig},
    memory::{Addr, Boundary, MemoryAccessError, PagedMemory, Result, WordStorage, WORD_BYTES},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

struct CacheLine {
    valid: bool,
    tag: u32,
    bytes: Box<[u8]>,
}

impl CacheLine {
    fn new(line_size: u32) -> Self {
        Self {
            valid: false,
            tag: 0,
            bytes: vec![0; line_size as usize].into_boxed_slice(),
        }
    }
    #[inline]
    fn word(&self, offset: usize) -> u32 {
        let mut v: [u8; 4] = [0; 4];
        v.copy_from_slice(&self.bytes[offset..(4 + offset)]);
        u32::from_le_bytes(v)
    }
    #[inline]
    fn set_word(&mut self, offset: usize, val: u32) {
        self.bytes[offset..(4 + offset)].copy_from_slice(&val.to_le_bytes());
    }
}

/// Where an address lands in one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub tag: u32,
    pub index: usize,
    pub offset: usize,
}

pub struct CacheLevel {
    config: LevelConfig,
    lines: Vec<CacheLine>,
}

impl CacheLevel {
    fn new(config: LevelConfig) -> Self {
        Self {
            lines: (0..config.num_lines())
                .map(|_| CacheLine::new(config.line_size))
                .collect(),
            config,
        }
    }
    pub fn config(&self) -> &LevelConfig {
        &self.config
    }
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }
    pub fn place(&self, addr: Addr) -> Placement {
        let line_size = self.config.line_size;
        let tag = addr.inner() / line_size;
        Placement {
            tag,
            index: tag as usize % self.lines.len(),
            offset: (addr.inner() % line_size) as usize,
        }
    }
    fn check(&self, addr: Addr) -> Result<()> {
        let offset = addr.inner() % self.config.line_size;
        if offset + WORD_BYTES > self.config.line_size {
            return Err(MemoryAccessError::AlignmentFault {
                addr,
                boundary: Boundary::Line,
                offset,
                size: self.config.line_size,
            });
        }
        Ok(())
    }
    /// word at `addr` if this level holds its line. no side effects.
    pub fn probe(&self, addr: Addr) -> Option<u32> {
        let p = self.place(addr);
        if p.offset + WORD_BYTES as usize > self.config.line_size as usize {
            return None;
        }
        let line = &self.lines[p.index];
        (line.valid && line.tag == p.tag).then(|| line.word(p.offset))
    }
    /// tag held by slot `index`, `None` while the slot is still invalid.
    pub fn tag_at(&self, index: usize) -> Option<u32> {
        let line = &self.lines[index];
        line.valid.then_some(line.tag)
    }
    /// count of slots that hold a line
    pub fn occupancy(&self) -> usize {
        self.lines.iter().filter(|l| l.valid).count()
    }
    /// loads the whole line containing `addr` from `storage` into its slot,
    /// overwriting whatever was there.
    fn refill<S: WordStorage>(&mut self, addr: Addr, storage: &S) -> Result<()> {
        let p = self.place(addr);
        let mut bytes = vec![0; self.config.line_size as usize];
        storage.read_block(addr.align_down(self.config.line_size), &mut bytes)?;
        let line = &mut self.lines[p.index];
        if line.valid {
            log::trace!(
                "evicting tag {:#x} from slot {} for tag {:#x}",
                line.tag,
                p.index,
                p.tag
            );
        }
        line.valid = true;
        line.tag = p.tag;
        line.bytes.copy_from_slice(&bytes);
        Ok(())
    }
    /// writes `val` into the slot for `addr`. a slot holding another line is
    /// reallocated from `storage`, which must already contain `val`.
    fn write<S: WordStorage>(&mut self, addr: Addr, val: u32, storage: &S) -> Result<()> {
        let p = self.place(addr);
        let line = &mut self.lines[p.index];
        if line.valid && line.tag == p.tag {
            line.set_word(p.offset, val);
            Ok(())
        } else {
            self.refill(addr, storage)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub data: u32,
    /// index of the level that hit, `None` on a full miss
    pub level_hit: Option<usize>,
    /// cycles until the data is available, counting the request cycle
    pub cycles: u32,
}

pub struct CacheHierarchy<S> {
    levels: Vec<CacheLevel>,
    storage: S,
    miss_cycles: u32,
    #[cfg(feature = "stat")]
    c_stat: stat::CacheStat,
}

impl CacheHierarchy<PagedMemory> {
    /// builds the levels and a fresh paged store from `config`.
    pub fn from_config(config: &SimConfig) -> std::result::Result<Self, ConfigError> {
        config.memory.validate()?;
        Self::new(
            &config.levels,
            config.miss_cycles,
            PagedMemory::new(&config.memory),
        )
    }
}

impl<S: WordStorage> CacheHierarchy<S> {
    pub fn new(
        levels: &[LevelConfig],
        miss_cycles: u32,
        storage: S,
    ) -> std::result::Result<Self, ConfigError> {
        config::validate_levels(levels, miss_cycles, storage.capacity())?;
        for (i, l) in levels.iter().enumerate() {
            log::info!(
                "L{}: {} bytes, {} lines of {} bytes, {} cycle latency",
                i + 1,
                l.capacity,
                l.num_lines(),
                l.line_size,
                l.latency
            );
        }
        Ok(Self {
            levels: levels.iter().copied().map(CacheLevel::new).collect(),
            storage,
            miss_cycles,
            #[cfg(feature = "stat")]
            c_stat: stat::CacheStat::new(levels.len()),
        })
    }
    pub fn levels(&self) -> &[CacheLevel] {
        &self.levels
    }
    pub fn level(&self, index: usize) -> Option<&CacheLevel> {
        self.levels.get(index)
    }
    pub fn storage(&self) -> &S {
        &self.storage
    }
    pub fn miss_cycles(&self) -> u32 {
        self.miss_cycles
    }
    pub fn worst_case_cycles(&self) -> u32 {
        let levels: Vec<_> = self.levels.iter().map(|l| l.config).collect();
        config::worst_case_cycles(&levels, self.miss_cycles)
    }
    /// rejects `addr` unless the store and every level can hold a word there.
    pub fn validate(&self, addr: Addr) -> Result<()> {
        self.storage.check(addr)?;
        self.levels.iter().try_for_each(|l| l.check(addr))
    }
    pub fn read(&mut self, addr: Addr) -> Result<ReadOutcome> {
        if let Err(e) = self.validate(addr) {
            #[cfg(feature = "stat")]
            self.c_stat.on_fault();
            return Err(e);
        }
        for (i, level) in self.levels.iter().enumerate() {
            if let Some(data) = level.probe(addr) {
                log::debug!("hit at L{} for {addr}", i + 1);
                #[cfg(feature = "stat")]
                self.c_stat.on_hit(i);
                return Ok(ReadOutcome {
                    data,
                    level_hit: Some(i),
                    cycles: level.config.hit_cycles(),
                });
            }
        }
        log::debug!("miss for {addr}, fetching from memory");
        let data = self.storage.read_word(addr)?;
        for level in self.levels.iter_mut() {
            level.refill(addr, &self.storage)?;
        }
        #[cfg(feature = "stat")]
        self.c_stat.on_miss();
        Ok(ReadOutcome {
            data,
            level_hit: None,
            cycles: self.miss_cycles,
        })
    }
    pub fn write(&mut self, addr: Addr, val: u32) -> Result<()> {
        if let Err(e) = self.validate(addr) {
            #[cfg(feature = "stat")]
            self.c_stat.on_fault();
            return Err(e);
        }
        self.storage.write_word(addr, val)?;
        for level in self.levels.iter_mut() {
            level.write(addr, val, &self.storage)?;
        }
        log::debug!("wrote {val:#010x} to {addr} through {} levels", self.levels.len());
        #[cfg(feature = "stat")]
        self.c_stat.on_write();
        Ok(())
    }
}

#[cfg(feature = "stat")]
impl<S: AddStats> AddStats for CacheHierarchy<S> {
    fn add_stats(&self, buf: &mut Stats) {
        let mut stat = self.c_stat.clone();
        stat.occupancy = self
            .levels
            .iter()
            .map(|l| (l.occupancy(), l.num_lines()))
            .collect();
        buf.push(Box::new(stat));
        self.storage.add_stats(buf);
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::stat::*;

    #[derive(Clone, Default)]
    pub struct CacheStat {
        hit_count: Vec<usize>,
        miss_count: usize,
        write_count: usize,
        fault_count: usize,
        /// (valid slots, total slots) per level
        pub occupancy: Vec<(usize, usize)>,
    }

    impl CacheStat {
        pub fn new(levels: usize) -> Self {
            Self {
                hit_count: vec![0; levels],
                ..Default::default()
            }
        }
        pub fn on_hit(&mut self, level: usize) {
            self.hit_count[level] += 1;
        }
        pub fn on_miss(&mut self) {
            self.miss_count += 1;
        }
        pub fn on_write(&mut self) {
            self.write_count += 1;
        }
        pub fn on_fault(&mut self) {
            self.fault_count += 1;
        }
    }

    impl Stat for CacheStat {
        fn view(&self, max_width: usize) -> Box<dyn StatView + '_> {
            Box::new(CacheStatView::new(self, max_width))
        }
    }

    pub struct CacheStatView<'a> {
        stat: &'a CacheStat,
        bar_width: usize,
    }

    impl<'a> CacheStatView<'a> {
        pub fn new(stat: &'a CacheStat, max_width: usize) -> Self {
            Self {
                stat,
                bar_width: max_width.saturating_sub(40).clamp(10, 40),
            }
        }
    }

    impl StatView for CacheStatView<'_> {
        fn header(&self) -> &'static str {
            "cache stat"
        }
        fn width(&self) -> usize {
            35 + self.bar_width
        }
    }

    impl fmt::Display for CacheStatView<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let hits: usize = self.stat.hit_count.iter().sum();
            let miss = self.stat.miss_count;
            let reads = hits + miss;
            for (i, &hit) in self.stat.hit_count.iter().enumerate() {
                let pct = format!("{:.6}", percent(hit, reads));
                let bar = ratio_bar(hit, reads, self.bar_width);
                writeln!(f, "   L{} hit: {hit:>10} ({pct:>10}%) {bar}", i + 1)?;
            }
            let pct = format!("{:.6}", percent(miss, reads));
            let bar = ratio_bar(miss, reads, self.bar_width);
            writeln!(f, "     miss: {miss:>10} ({pct:>10}%) {bar}")?;
            writeln!(f, "   writes: {:>10}", self.stat.write_count)?;
            writeln!(f, "   faults: {:>10}", self.stat.fault_count)?;
            for (i, (valid, total)) in self.stat.occupancy.iter().enumerate() {
                writeln!(f, "  L{} used: {valid:>10} / {total}", i + 1)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;

    const A: Addr = Addr::new(0x0000);
    /// same L1 slot as `A`, different L2 slot
    const B_L1: Addr = Addr::new(0x0400);
    /// same slot as `A` in both levels
    const B_ALL: Addr = Addr::new(0x0800);

    fn default_hierarchy() -> CacheHierarchy<PagedMemory> {
        CacheHierarchy::from_config(&SimConfig::default()).unwrap()
    }

    #[test]
    fn test_placement() {
        let h = default_hierarchy();
        let l1 = h.level(0).unwrap();
        let l2 = h.level(1).unwrap();
        assert_eq!(
            Placement {
                tag: 0x41,
                index: 1,
                offset: 8
            },
            l1.place(Addr::new(0x1048))
        );
        assert_eq!(
            Placement {
                tag: 0x41,
                index: 1,
                offset: 8
            },
            l2.place(Addr::new(0x1048))
        );
        assert_eq!(l1.place(A).index, l1.place(B_L1).index);
        assert_ne!(l2.place(A).index, l2.place(B_L1).index);
        assert_eq!(l2.place(A).index, l2.place(B_ALL).index);
    }

    #[test]
    fn test_round_trip() {
        let mut h = default_hierarchy();
        h.write(Addr::new(0x0), 0x12345678).unwrap();
        let r = h.read(Addr::new(0x0)).unwrap();
        assert_eq!(0x12345678, r.data);
        assert_eq!(Some(0), r.level_hit);
        h.write(Addr::new(0x1000), 0x87654321).unwrap();
        assert_eq!(0x87654321, h.read(Addr::new(0x1000)).unwrap().data);
    }

    #[test]
    fn test_fill_on_miss_then_hit() {
        let mut h = default_hierarchy();
        let addr = Addr::new(0x1000);
        let r = h.read(addr).unwrap();
        assert_eq!(
            ReadOutcome {
                data: 0,
                level_hit: None,
                cycles: 100
            },
            r
        );
        for level in h.levels() {
            assert_eq!(Some(0), level.probe(addr));
        }
        let r = h.read(addr).unwrap();
        assert_eq!(Some(0), r.level_hit);
        assert_eq!(2, r.cycles);
    }

    #[test]
    fn test_fill_loads_whole_line() {
        let mut h = default_hierarchy();
        // seed the store behind the cache's back: the first line is still invalid
        h.storage.write_word(Addr::new(0x44), 0xaaaa5555).unwrap();
        assert_eq!(0, h.read(Addr::new(0x40)).unwrap().data);
        let r = h.read(Addr::new(0x44)).unwrap();
        assert_eq!(Some(0), r.level_hit);
        assert_eq!(0xaaaa5555, r.data);
    }

    #[test]
    fn test_write_through() {
        let mut h = default_hierarchy();
        h.write(Addr::new(0x2004), 0xdeadbeef).unwrap();
        assert_eq!(0xdeadbeef, h.storage().read_word(Addr::new(0x2004)).unwrap());
        for level in h.levels() {
            assert_eq!(Some(0xdeadbeef), level.probe(Addr::new(0x2004)));
        }
    }

    #[test]
    fn test_conflict_overwrite_one_level() {
        let mut h = default_hierarchy();
        h.write(A, 0x1111).unwrap();
        h.write(B_L1, 0x2222).unwrap();
        let l1 = h.level(0).unwrap();
        let slot = l1.place(B_L1);
        assert_eq!(Some(slot.tag), l1.tag_at(slot.index));
        assert_eq!(Some(0x2222), l1.probe(B_L1));
        assert_eq!(None, l1.probe(A));
        let r = h.read(A).unwrap();
        assert_eq!(Some(1), r.level_hit);
        assert_eq!(0x1111, r.data);
        assert_eq!(4, r.cycles);
    }

    #[test]
    fn test_conflict_overwrite_all_levels() {
        let mut h = default_hierarchy();
        h.write(A, 0x1111).unwrap();
        h.write(B_ALL, 0x2222).unwrap();
        let r = h.read(A).unwrap();
        assert_eq!(None, r.level_hit);
        assert_eq!(0x1111, r.data);
        assert_eq!(h.miss_cycles(), r.cycles);
        // the refetch evicted B again
        assert_eq!(None, h.level(0).unwrap().probe(B_ALL));
        assert_eq!(0x2222, h.read(B_ALL).unwrap().data);
    }

    #[test]
    fn test_write_miss_keeps_rest_of_line() {
        let mut h = default_hierarchy();
        h.write(Addr::new(0x100), 0x0101).unwrap();
        h.write(Addr::new(0x500), 0x0505).unwrap();
        h.write(Addr::new(0x104), 0x0104).unwrap();
        // 0x104 reallocated the L1 slot with the line of 0x100 from the store
        let r = h.read(Addr::new(0x100)).unwrap();
        assert_eq!(Some(0), r.level_hit);
        assert_eq!(0x0101, r.data);
    }

    #[test]
    fn test_line_alignment_fault() {
        let mut h = default_hierarchy();
        let addr = Addr::new(0x3e);
        let e = h.write(addr, 0xffffffff).unwrap_err();
        assert_eq!(
            MemoryAccessError::AlignmentFault {
                addr,
                boundary: Boundary::Line,
                offset: 0x3e,
                size: 64
            },
            e
        );
        assert!(h.read(addr).is_err());
        for level in h.levels() {
            assert_eq!(0, level.occupancy());
        }
        assert_eq!(0, h.storage().resident_pages());
    }

    #[test]
    fn test_unaligned_within_line() {
        let mut h = default_hierarchy();
        h.write(Addr::new(0x1), 0x44332211).unwrap();
        let r = h.read(Addr::new(0x1)).unwrap();
        assert_eq!(0x44332211, r.data);
        assert_eq!(0x33221100, h.read(Addr::new(0x0)).unwrap().data);
    }

    #[test]
    fn test_out_of_range() {
        let config = SimConfig {
            memory: MemoryConfig {
                page_size: 4096,
                page_count: 1,
            },
            ..Default::default()
        };
        let mut h = CacheHierarchy::from_config(&config).unwrap();
        let addr = Addr::new(0x1000);
        assert!(matches!(
            h.read(addr),
            Err(MemoryAccessError::OutOfRange { .. })
        ));
        assert!(matches!(
            h.write(addr, 1),
            Err(MemoryAccessError::OutOfRange { .. })
        ));
        assert_eq!(0, h.level(0).unwrap().occupancy());
    }

    #[test]
    fn test_single_level() {
        let config = SimConfig {
            levels: vec![LevelConfig::new(128, 16, 2)],
            miss_cycles: 20,
            ..Default::default()
        };
        let mut h = CacheHierarchy::from_config(&config).unwrap();
        assert_eq!(20, h.read(Addr::new(0x20)).unwrap().cycles);
        let r = h.read(Addr::new(0x24)).unwrap();
        assert_eq!((Some(0), 3), (r.level_hit, r.cycles));
        h.write(Addr::new(0xa0), 9).unwrap();
        // 0xa0 shares slot 2 with 0x20
        assert_eq!(None, h.level(0).unwrap().probe(Addr::new(0x20)));
        assert_eq!(20, h.read(Addr::new(0x20)).unwrap().cycles);
    }

    #[test]
    fn test_mixed_line_sizes() {
        let config = SimConfig {
            levels: vec![LevelConfig::new(64, 8, 1), LevelConfig::new(512, 128, 4)],
            ..Default::default()
        };
        let mut h = CacheHierarchy::from_config(&config).unwrap();
        h.write(Addr::new(0x7c), 0x5a5a).unwrap();
        // 0x7c + 4 fits an 8-byte line but 0x7e does not
        assert!(h.write(Addr::new(0x7e), 1).is_err());
        assert_eq!(Some(0x5a5a), h.level(1).unwrap().probe(Addr::new(0x7c)));
        h.write(Addr::new(0x3c), 0x3c3c).unwrap();
        // L1 line of 0x3c is slot 7, shared with 0x7c
        let r = h.read(Addr::new(0x7c)).unwrap();
        assert_eq!((Some(1), 0x5a5a), (r.level_hit, r.data));
    }

    #[test]
    fn test_rejects_bad_levels() {
        let memory = PagedMemory::new(&MemoryConfig::default());
        assert!(matches!(
            CacheHierarchy::new(&[], 10, memory),
            Err(ConfigError::NoLevels)
        ));
    }
}
