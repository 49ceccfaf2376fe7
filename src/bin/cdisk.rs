extern crate cbmdisk;
extern crate clap;

use clap::{App, AppSettings, Arg};
use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use cbmdisk::tool::{Flow, Session, ToolError};
use log::LevelFilter;

// Possible exit codes
static _EXIT_SUCCESS: i32 = 0;
static EXIT_FAILURE: i32 = 1;

/// A lone dash is an argument (e.g. `read file -` prints to standard output),
/// never a command.
static STDINOUT_PSEUDOFILENAME: &str = "-";

static PROMPT_UNIT: &str = "cdisk #";

fn main() {
    init_logging();

    // Parse command-line arguments
    let app = App::new("Commodore Disk Image Utility")
        .version("0.1.0")
        .about(
            "Maintain D64/D71/D81/D80/D82/G64 disk images.\n\n\
             Commands are given as `-command args...` and run in order.  With no\n\
             commands, an interactive prompt reads them from standard input.",
        )
        .setting(AppSettings::TrailingVarArg)
        .setting(AppSettings::AllowLeadingHyphen)
        .arg(
            Arg::with_name("arguments")
                .multiple(true)
                .help("[diskimage] [-command [args...]]..."),
        );

    let matches = app.get_matches();
    let arguments: Vec<String> = matches
        .values_of("arguments")
        .map(|values| values.map(String::from).collect())
        .unwrap_or_default();

    let (diskimage, commands) = split_command_line(&arguments);
    let mut session = Session::new(io::stdout());

    if let Some(diskimage) = diskimage {
        if let Err(e) = session.attach(diskimage, session.current_unit()) {
            eprintln!("Error: cannot attach {}: {}", diskimage, e);
            process::exit(EXIT_FAILURE);
        }
    }

    if commands.is_empty() {
        interactive(&mut session);
    } else {
        for command in commands {
            match session.execute(&command) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(EXIT_FAILURE);
                }
            }
        }
        if let Err(e) = session.execute(&["quit".to_string()]) {
            eprintln!("Error: {}", e);
            process::exit(EXIT_FAILURE);
        }
    }
}

/// Log through `RUST_LOG` when it is set.  Otherwise show warnings only,
/// until the `verbose` command asks for more.
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format_timestamp(None)
        .init();
    if env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Warn);
    }
}

/// Separate an optional leading disk image from the `-command args...`
/// groups that follow it.
fn split_command_line(arguments: &[String]) -> (Option<&str>, Vec<Vec<String>>) {
    let is_command = |arg: &String| arg.starts_with('-') && arg != STDINOUT_PSEUDOFILENAME;
    let (diskimage, rest) = match arguments.split_first() {
        Some((first, rest)) if !is_command(first) => (Some(first.as_str()), rest),
        _ => (None, arguments),
    };
    let mut commands: Vec<Vec<String>> = vec![];
    for arg in rest {
        if is_command(arg) {
            commands.push(vec![arg[1..].to_string()]);
        } else if let Some(command) = commands.last_mut() {
            command.push(arg.clone());
        } else {
            eprintln!("Error: unexpected argument `{}'.", arg);
            process::exit(EXIT_FAILURE);
        }
    }
    (diskimage, commands)
}

fn interactive<W: Write>(session: &mut Session<W>) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}{}> ", PROMPT_UNIT, session.current_unit());
        if io::stdout().flush().is_err() {
            break;
        }
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                eprintln!("Error: {}", e);
                break;
            }
            None => {
                println!();
                break;
            }
        };
        match session.execute_line(&line) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return,
            Err(ToolError::Usage(message)) => eprintln!("{}", message),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    if let Err(e) = session.execute_line("quit") {
        eprintln!("Error: {}", e);
    }
}
