use std::fmt;

use bitmask_enum::bitmask;
use thiserror::Error;

use crate::{
    cache::{CacheHierarchy, ReadOutcome},
    memory::{Addr, MemoryAccessError, WordStorage},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

/// request lines driven by the requester on a clock edge
#[bitmask(u8)]
pub enum Signal {
    Read,
    Write,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::Read), self.contains(Self::Write)) {
            (true, true) => write!(f, "read+write"),
            (true, false) => write!(f, "read"),
            (false, true) => write!(f, "write"),
            (false, false) => write!(f, "idle"),
        }
    }
}

/// Input pins sampled on one clock edge.
#[derive(Clone, Copy)]
pub struct Request {
    pub signal: Signal,
    pub address: Addr,
    pub write_data: u32,
}

impl Request {
    pub fn idle() -> Self {
        Self {
            signal: Signal::none(),
            address: Addr::default(),
            write_data: 0,
        }
    }
    pub fn read(address: Addr) -> Self {
        Self {
            signal: Signal::Read,
            address,
            write_data: 0,
        }
    }
    pub fn write(address: Addr, write_data: u32) -> Self {
        Self {
            signal: Signal::Write,
            address,
            write_data,
        }
    }
    /// both lines asserted at once; always a protocol violation
    pub fn read_write(address: Addr, write_data: u32) -> Self {
        Self {
            signal: Signal::Read | Signal::Write,
            address,
            write_data,
        }
    }
    pub fn is_idle(&self) -> bool {
        !self.signal.contains(Signal::Read) && !self.signal.contains(Signal::Write)
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::idle()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_idle() {
            return write!(f, "idle");
        }
        write!(f, "{} {}", self.signal, self.address)?;
        if self.signal.contains(Signal::Write) {
            write!(f, " <- {:#010x}", self.write_data)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    #[error("read and write asserted in the same cycle")]
    ProtocolViolation,
    #[error("request rejected, previous request still in service")]
    Busy,
    #[error(transparent)]
    Memory(#[from] MemoryAccessError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// `remaining` more ticks until `ready`
    Servicing { remaining: u32 },
    Done,
}

/// What a completed request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Read(ReadOutcome),
    Write,
}

/// Output pins for one clock edge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub ready: bool,
    /// held from the last completed read unless this tick completes one
    pub read_data: u32,
    /// set on the tick a request completes successfully
    pub outcome: Option<Outcome>,
    /// set when a request was refused or failed this tick
    pub fault: Option<RequestError>,
}

pub struct RequestHandshake<S> {
    hierarchy: CacheHierarchy<S>,
    state: State,
    pending: Option<ReadOutcome>,
    read_data: u32,
    #[cfg(feature = "stat")]
    h_stat: stat::HandshakeStat,
}

impl<S: WordStorage> RequestHandshake<S> {
    pub fn new(hierarchy: CacheHierarchy<S>) -> Self {
        Self {
            hierarchy,
            state: State::Idle,
            pending: None,
            read_data: 0,
            #[cfg(feature = "stat")]
            h_stat: Default::default(),
        }
    }
    pub fn state(&self) -> State {
        self.state
    }
    pub fn hierarchy(&self) -> &CacheHierarchy<S> {
        &self.hierarchy
    }
    pub fn into_hierarchy(self) -> CacheHierarchy<S> {
        self.hierarchy
    }
    /// advances one clock edge with `req` on the input pins.
    pub fn step(&mut self, req: &Request) -> Tick {
        match self.state {
            State::Servicing { remaining } => self.service(req, remaining),
            State::Idle | State::Done => self.accept(req),
        }
    }
    fn tick(&self) -> Tick {
        Tick {
            read_data: self.read_data,
            ..Default::default()
        }
    }
    fn service(&mut self, req: &Request, remaining: u32) -> Tick {
        let mut tick = self.tick();
        if !req.is_idle() {
            log::warn!("rejecting {req}: {:?} in service", self.state);
            #[cfg(feature = "stat")]
            self.h_stat.on_busy();
            tick.fault = Some(RequestError::Busy);
        }
        if remaining > 1 {
            self.state = State::Servicing {
                remaining: remaining - 1,
            };
            return tick;
        }
        match self.pending.take() {
            Some(r) => self.complete(tick, Outcome::Read(r)),
            None => {
                self.state = State::Done;
                tick.ready = true;
                tick
            }
        }
    }
    fn complete(&mut self, mut tick: Tick, outcome: Outcome) -> Tick {
        if let Outcome::Read(r) = outcome {
            self.read_data = r.data;
        }
        self.state = State::Done;
        #[cfg(feature = "stat")]
        self.h_stat.on_complete();
        tick.ready = true;
        tick.read_data = self.read_data;
        tick.outcome = Some(outcome);
        tick
    }
    fn reject(&mut self, mut tick: Tick, e: RequestError) -> Tick {
        self.state = State::Done;
        #[cfg(feature = "stat")]
        self.h_stat.on_fault();
        tick.ready = true;
        tick.fault = Some(e);
        tick
    }
    fn accept(&mut self, req: &Request) -> Tick {
        let tick = self.tick();
        let addr = req.address;
        match (
            req.signal.contains(Signal::Read),
            req.signal.contains(Signal::Write),
        ) {
            (true, true) => {
                log::warn!("simultaneous read and write at {addr}, ignoring request");
                self.reject(tick, RequestError::ProtocolViolation)
            }
            (true, false) => match self.hierarchy.read(addr) {
                Ok(r) if r.cycles > 1 => {
                    self.pending = Some(r);
                    self.state = State::Servicing {
                        remaining: r.cycles - 1,
                    };
                    tick
                }
                Ok(r) => self.complete(tick, Outcome::Read(r)),
                Err(e) => {
                    log::warn!("read {addr} failed: {e}");
                    self.reject(tick, e.into())
                }
            },
            (false, true) => match self.hierarchy.write(addr, req.write_data) {
                Ok(()) => self.complete(tick, Outcome::Write),
                Err(e) => {
                    log::warn!("write {addr} failed: {e}");
                    self.reject(tick, e.into())
                }
            },
            (false, false) => {
                self.state = State::Idle;
                tick
            }
        }
    }
}

#[cfg(feature = "stat")]
impl<S: AddStats> AddStats for RequestHandshake<S> {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.h_stat));
        self.hierarchy.add_stats(buf);
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::stat::*;

    #[derive(Clone, Copy, Default)]
    pub struct HandshakeStat {
        completed: usize,
        faulted: usize,
        busy: usize,
    }

    impl HandshakeStat {
        pub fn on_complete(&mut self) {
            self.completed += 1;
        }
        pub fn on_fault(&mut self) {
            self.faulted += 1;
        }
        pub fn on_busy(&mut self) {
            self.busy += 1;
        }
    }

    impl Stat for HandshakeStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ HandshakeStat {
        fn header(&self) -> &'static str {
            "requests"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ HandshakeStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "   completed: {:>10}", self.completed)?;
            writeln!(f, "     faulted: {:>10}", self.faulted)?;
            writeln!(f, "  while busy: {:>10}", self.busy)
        }
    }
}
