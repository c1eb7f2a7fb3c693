//! Fixture binary for the `reclaim-process` integration tests.

use std::{
    env,
    io::{self, Write},
    process, thread,
    time::Duration,
};

fn value<T: std::str::FromStr>(value: Option<String>, flag: &str) -> T {
    let Some(raw) = value else {
        eprintln!("missing value for {flag}");
        process::exit(64);
    };
    match raw.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            eprintln!("invalid value for {flag}: {raw}");
            process::exit(64);
        }
    }
}

fn fill(mut out: impl Write, mut bytes: usize, byte: u8) -> io::Result<()> {
    let block = [byte; 4096];
    while bytes > 0 {
        let n = bytes.min(block.len());
        out.write_all(&block[..n])?;
        bytes -= n;
    }
    out.flush()
}

fn main() -> io::Result<()> {
    let mut args = env::args().skip(1);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--print" => {
                let line: String = value(args.next(), "--print");
                println!("{line}");
            }
            "--stdout-bytes" => fill(io::stdout().lock(), value(args.next(), &flag), b'o')?,
            "--stderr-bytes" => fill(io::stderr().lock(), value(args.next(), &flag), b'e')?,
            "--sleep-ms" => thread::sleep(Duration::from_millis(value(args.next(), &flag))),
            "--spawn-sleeper-ms" => {
                let ms: u64 = value(args.next(), &flag);
                process::Command::new(env::current_exe()?)
                    .args(["--sleep-ms", &ms.to_string()])
                    .spawn()?;
            }
            "--exit-code" => process::exit(value(args.next(), &flag)),
            other => {
                eprintln!("unknown argument: {other}");
                process::exit(64);
            }
        }
    }
    Ok(())
}
