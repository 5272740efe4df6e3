use std::time::Duration;

use crate::platform::{parse_kern_boottime, run_command};

pub fn boot_marker(timeout: Duration) -> Option<String> {
    let output = run_command("sysctl", &["-n", "kern.boottime"], timeout).ok()?;
    if output.exit_code != 0 {
        return None;
    }
    parse_kern_boottime(&output.stdout).map(|sec| format!("boottime:{sec}"))
}
