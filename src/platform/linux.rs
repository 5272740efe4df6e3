use crate::platform::parse_proc_stat_btime;

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

pub fn boot_marker() -> Option<String> {
    if let Ok(id) = std::fs::read_to_string(BOOT_ID_PATH) {
        let id = id.trim();
        if !id.is_empty() {
            return Some(format!("boot_id:{id}"));
        }
    }

    let stat = std::fs::read_to_string("/proc/stat").ok()?;
    parse_proc_stat_btime(&stat).map(|btime| format!("btime:{btime}"))
}
