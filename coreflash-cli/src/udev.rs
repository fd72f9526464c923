//! udev rule installation for Linux serial access.

use anyhow::Result;

#[cfg(target_os = "linux")]
pub fn fix_permissions() -> Result<()> {
    use anyhow::Context;
    use console::style;
    use coreflash::link::bridge::KNOWN_BRIDGES;
    use std::fs;
    use std::path::Path;

    const RULES_PATH: &str = "/etc/udev/rules.d/99-coreflash.rules";

    let mut rules = String::from("# Grant users access to CORE-family board bridges.\n");
    for (vid, pid, name) in KNOWN_BRIDGES {
        rules.push_str(&format!(
            "# {name}\nSUBSYSTEM==\"tty\", ATTRS{{idVendor}}==\"{vid:04x}\", \
             ATTRS{{idProduct}}==\"{pid:04x}\", MODE=\"0666\"\n"
        ));
    }

    fs::write(Path::new(RULES_PATH), rules)
        .with_context(|| format!("failed to write {RULES_PATH}, run as root"))?;

    eprintln!("{}", style(format!("Installed {RULES_PATH}")).green());
    eprintln!("Replug the board or run: udevadm control --reload-rules");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn fix_permissions() -> Result<()> {
    anyhow::bail!("--fix-permissions is only supported on Linux");
}
