//! `maps` profile: the process's memory mappings

use anyhow::Result;
use std::io::Write;

use super::NamedProfile;
use crate::domain::Pid;
use crate::symbolization::read_memory_maps;

#[derive(Debug, Clone, Copy)]
pub struct MapsProfile {
    pid: Pid,
}

impl Default for MapsProfile {
    fn default() -> Self {
        Self { pid: Pid::current() }
    }
}

impl NamedProfile for MapsProfile {
    fn name(&self) -> &str {
        "maps"
    }

    fn count(&self) -> usize {
        read_memory_maps(self.pid).map_or(0, |maps| maps.lines().count())
    }

    fn write_to(&self, out: &mut dyn Write, _debug: i32) -> Result<()> {
        out.write_all(read_memory_maps(self.pid)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_maps_dump_lists_executable() {
        let profile = MapsProfile::default();
        let mut out = Vec::new();
        profile.write_to(&mut out, 0).unwrap();

        let text = String::from_utf8(out).unwrap();
        let exe = std::env::current_exe().unwrap();
        assert!(text.contains(&*exe.to_string_lossy()));
        assert!(profile.count() > 0);
    }
}
