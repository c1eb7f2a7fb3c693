//! Stand-in for `reclaim-trim-target` used by the `SubprocessHelper` tests.
//!
//! The requested pid selects the behaviour, since the launcher only ever
//! passes `--pid <n>`.

use reclaim_memory::{CallStatus, HelperInvocationResult, HelperStep, OutputFormat, GB};
use std::{env, process, thread, time::Duration};

const FREED_TEXT: u32 = 1001;
const OPEN_FAILED: u32 = 1002;
const GARBAGE: u32 = 1003;
const HANG: u32 = 1004;
const FREED_MACHINE: u32 = 1005;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let pid = match args.as_slice() {
        [flag, pid] if flag == "--pid" => pid.parse::<u32>().ok(),
        _ => None,
    };
    let Some(pid) = pid else {
        eprintln!("usage: --pid <n>");
        process::exit(1);
    };

    let measured = || {
        HelperInvocationResult::measured(
            pid,
            vec![
                HelperStep::from_status("EmptyWorkingSet", CallStatus::Succeeded),
                HelperStep::from_status("SetProcessWorkingSetSize", CallStatus::Succeeded),
            ],
            4 * GB,
            3 * GB,
        )
    };

    match pid {
        FREED_TEXT => print!("{}", measured().render(OutputFormat::Text)),
        FREED_MACHINE => print!("{}", measured().render(OutputFormat::Machine)),
        OPEN_FAILED => {
            print!(
                "{}",
                HelperInvocationResult::open_failed(pid, Some(5)).render(OutputFormat::Text)
            );
            process::exit(2);
        }
        GARBAGE => println!("segmentation fault (core dumped)"),
        HANG => thread::sleep(Duration::from_secs(30)),
        _ => {
            eprintln!("no behaviour for pid {pid}");
            process::exit(1);
        }
    }
}
