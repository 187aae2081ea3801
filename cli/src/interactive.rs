use std::io::{stdin, stdout, Write};

use anyhow::Result;

use crate::script::{self, Flow, Runner};

const PROMPT: &str = "(memsim) ";

/// reads commands from stdin until `exit` or end of input. a bad command is
/// reported and the session goes on.
pub(crate) fn execute_interactive(runner: &mut Runner) -> Result<()> {
    let mut buf = String::new();
    loop {
        print!("{PROMPT}");
        stdout().flush()?;
        buf.clear();
        if stdin().read_line(&mut buf)? == 0 {
            println!();
            break Ok(());
        }
        let cmd = match script::parse_line(buf.trim_end()) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("invalid command: {e}");
                continue;
            }
        };
        match runner.exec(cmd) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break Ok(()),
            Err(e) => println!("error: {e}"),
        }
    }
}
