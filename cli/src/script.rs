use anyhow::{anyhow, Result};
use memsim::{
    handshake::{Request, Signal},
    memory::{Addr, PagedMemory},
    sim::Simulator,
};

peg::parser!(grammar script() for str {
    rule number() -> u32
        = quiet!{"0" ['x' | 'X']} n:$(quiet!{['0'..='9' | 'a'..='f' | 'A'..='F']+}) {?
            u32::from_str_radix(n, 16).map_err(|_| "32-bit number")
        }
        / n:$(quiet!{['0'..='9']+}) {? n.parse().map_err(|_| "32-bit number") }
        / expected!("number")
    rule addr() -> Addr
        = n:number() { Addr::new(n) }
    rule count() -> u32
        = __ n:number() { n }
    rule command() -> Command
        = "read" _ "+" _ "write" __ addr:addr() __ data:number() {
            Command::Issue(Request::read_write(addr, data))
        }
        / "read" __ addr:addr() { Command::Issue(Request::read(addr)) }
        / "write" __ addr:addr() __ data:number() { Command::Issue(Request::write(addr, data)) }
        / "idle" n:count()? { Command::Idle(n.unwrap_or(1)) }
        / "expect" __ data:number() { Command::Expect(data) }
        / "stat" { Command::Stat }
        / "exit" { Command::Exit }
    rule comment() = quiet!{"#" [c if c != '\n']*}
    pub(crate) rule line() -> Option<Command>
        = _ c:command()? _ comment()? { c }

    rule ws() = quiet!{[' ' | '\t' | '\r']}
        / expected!("whitespace")
    rule _() = ws()*
    rule __() = ws()+
});

pub(crate) enum Command {
    Issue(Request),
    Idle(u32),
    /// checks the data returned by the last read
    Expect(u32),
    Stat,
    Exit,
}

pub(crate) fn parse_line(line: &str) -> Result<Option<Command>> {
    Ok(script::line(line)?)
}

pub(crate) enum Flow {
    Continue,
    Exit,
}

/// Executes commands against a simulator, remembering the last read result.
pub(crate) struct Runner {
    sim: Simulator<PagedMemory>,
    last_read: Option<u32>,
}

impl Runner {
    pub fn new(sim: Simulator<PagedMemory>) -> Self {
        Self {
            sim,
            last_read: None,
        }
    }
    pub fn sim(&self) -> &Simulator<PagedMemory> {
        &self.sim
    }
    pub fn exec(&mut self, cmd: Command) -> Result<Flow> {
        match cmd {
            Command::Issue(req) => {
                let c = self.sim.issue(req)?;
                println!("{c}");
                // a faulted read leaves nothing to expect
                if req.signal == Signal::Read {
                    self.last_read = c.read_data();
                }
            }
            Command::Idle(n) => self.sim.idle(n),
            Command::Expect(expected) => match self.last_read {
                Some(v) if v == expected => {}
                Some(v) => {
                    return Err(anyhow!(
                        "expected {expected:#010x}, last read returned {v:#010x}"
                    ))
                }
                None => return Err(anyhow!("expected {expected:#010x}, but nothing was read")),
            },
            Command::Stat => crate::print_stat(&self.sim),
            Command::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }
    /// runs every line of `script`; the first failing line aborts the run.
    pub fn run_script(&mut self, script: &str) -> Result<()> {
        for (no, line) in script.lines().enumerate() {
            let cmd = parse_line(line).map_err(|e| anyhow!("line {}: {e}", no + 1))?;
            if let Some(cmd) = cmd {
                let flow = self
                    .exec(cmd)
                    .map_err(|e| anyhow!("line {}: {e}", no + 1))?;
                if let Flow::Exit = flow {
                    break;
                }
            }
        }
        Ok(())
    }
}
