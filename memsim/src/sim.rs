use std::fmt;

use thiserror::Error;

use crate::{
    cache::CacheHierarchy,
    config::{ConfigError, SimConfig},
    handshake::{Outcome, Request, RequestError, RequestHandshake, Tick},
    memory::{PagedMemory, WordStorage},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("{request} issued at cycle {issued_at} not ready after {bound} cycles")]
    Stalled {
        request: String,
        issued_at: u64,
        bound: u32,
    },
}

/// Drives the handshake: owns the clock and waits out each request.
pub struct Simulator<S> {
    handshake: RequestHandshake<S>,
    cycle: u64,
    wait_bound: u32,
    do_trace: bool,
    #[cfg(feature = "stat")]
    stat_builder: stat::SimStatBuilder,
}

/// A request observed from issue to `ready`.
pub struct Completion {
    pub request: Request,
    /// cycle the request was on the input pins
    pub issued_at: u64,
    /// cycle `ready` asserted
    pub ready_at: u64,
    pub tick: Tick,
}

impl Completion {
    /// cycles spent, counting both the issue and the ready cycle
    pub fn cycles(&self) -> u64 {
        self.ready_at - self.issued_at + 1
    }
    pub fn read_data(&self) -> Option<u32> {
        match self.tick.outcome {
            Some(Outcome::Read(r)) => Some(r.data),
            _ => None,
        }
    }
    pub fn fault(&self) -> Option<RequestError> {
        self.tick.fault
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06} {}", self.issued_at, self.request)?;
        match (self.tick.fault, self.tick.outcome) {
            (Some(e), _) => write!(f, " -> {e}")?,
            (None, Some(Outcome::Read(r))) => {
                write!(f, " -> {:#010x}", r.data)?;
                match r.level_hit {
                    Some(l) => write!(f, " (L{} hit", l + 1)?,
                    None => write!(f, " (miss")?,
                }
                write!(f, ", {} cycles)", self.cycles())?
            }
            (None, Some(Outcome::Write)) => write!(f, " ({} cycle)", self.cycles())?,
            (None, None) => {}
        }
        Ok(())
    }
}

impl Simulator<PagedMemory> {
    pub fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_hierarchy(CacheHierarchy::from_config(config)?))
    }
}

impl<S: WordStorage> Simulator<S> {
    pub fn with_hierarchy(hierarchy: CacheHierarchy<S>) -> Self {
        let wait_bound = hierarchy.worst_case_cycles();
        Self {
            handshake: RequestHandshake::new(hierarchy),
            cycle: 0,
            wait_bound,
            do_trace: false,
            #[cfg(feature = "stat")]
            stat_builder: stat::SimStatBuilder::new(),
        }
    }
    pub fn set_trace(&mut self, do_trace: bool) {
        self.do_trace = do_trace;
    }
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
    pub fn handshake(&self) -> &RequestHandshake<S> {
        &self.handshake
    }
    pub fn hierarchy(&self) -> &CacheHierarchy<S> {
        self.handshake.hierarchy()
    }
    /// one clock edge with `req` on the input pins.
    pub fn tick(&mut self, req: &Request) -> Tick {
        self.cycle += 1;
        let t = self.handshake.step(req);
        if self.do_trace {
            print_trace(self.cycle, req, &t);
        }
        t
    }
    pub fn idle(&mut self, cycles: u32) {
        let idle = Request::idle();
        for _ in 0..cycles {
            self.tick(&idle);
        }
    }
    /// drives `req` for one cycle, then idles until `ready`.
    pub fn issue(&mut self, request: Request) -> Result<Completion, SimError> {
        let issued_at = self.cycle + 1;
        let mut tick = self.tick(&request);
        let idle = Request::idle();
        while !tick.ready {
            if self.cycle - issued_at + 1 >= self.wait_bound as u64 {
                return Err(SimError::Stalled {
                    request: request.to_string(),
                    issued_at,
                    bound: self.wait_bound,
                });
            }
            tick = self.tick(&idle);
        }
        #[cfg(feature = "stat")]
        self.stat_builder.on_request(self.cycle - issued_at + 1);
        Ok(Completion {
            request,
            issued_at,
            ready_at: self.cycle,
            tick,
        })
    }
}

#[inline]
fn print_trace(cycle: u64, req: &Request, t: &Tick) {
    let ready = if t.ready { "ready" } else { "-" };
    println!(
        "#{cycle:010}, in: {req},\tout: {ready} {:#010x}",
        t.read_data
    );
}

#[cfg(feature = "stat")]
impl<S: WordStorage + AddStats> Simulator<S> {
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

#[cfg(feature = "stat")]
impl<S: AddStats> AddStats for Simulator<S> {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat_builder.finish(self.cycle)));
        self.handshake.add_stats(buf);
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::{fmt, time};

    use crate::stat::*;

    pub struct SimStatBuilder {
        begin: time::Instant,
        requests: u64,
        request_cycles: u64,
    }

    impl SimStatBuilder {
        pub fn new() -> Self {
            Self {
                begin: time::Instant::now(),
                requests: 0,
                request_cycles: 0,
            }
        }
        pub fn on_request(&mut self, cycles: u64) {
            self.requests += 1;
            self.request_cycles += cycles;
        }
        pub fn finish(&self, cycle: u64) -> SimStat {
            SimStat {
                cycle,
                requests: self.requests,
                request_cycles: self.request_cycles,
                elapsed: self.begin.elapsed(),
            }
        }
    }

    impl Default for SimStatBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct SimStat {
        cycle: u64,
        requests: u64,
        request_cycles: u64,
        elapsed: time::Duration,
    }

    impl Stat for SimStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ SimStat {
        fn header(&self) -> &'static str {
            "simulator stat"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ SimStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let ms = format!("{} ms", self.elapsed.as_millis());
            writeln!(f, "  elapsed total: {ms:>13}")?;
            let cycle = format!("#{}", self.cycle);
            writeln!(f, "  cycles total: {cycle:>14}")?;
            writeln!(f, "  requests: {:>18}", self.requests)?;
            let avg = if self.requests == 0 {
                0.
            } else {
                self.request_cycles as f64 / self.requests as f64
            };
            let avg = format!("{avg:.3}");
            writeln!(f, "  avg cycles/request: {avg:>8}")
        }
    }
}
