//! Socket and config directory resolution (§6 "Socket path").

use std::path::PathBuf;

use crate::error::{MuxError, Result};

/// `${MUXKIT_SOCK_DIR}/muxkit-${uid}/default`, directory mode 0700.
pub fn socket_dir() -> Result<PathBuf> {
    let base = match std::env::var("MUXKIT_SOCK_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => directories::BaseDirs::new()
            .ok_or_else(|| MuxError::Config("could not find home directory".into()))?
            .home_dir()
            .join(".muxkit")
            .join("sock"),
    };

    let uid = nix::unistd::getuid().as_raw();
    let dir = base.join(format!("muxkit-{uid}"));
    ensure_dir_0700(&dir)?;
    Ok(dir)
}

pub fn socket_path() -> Result<PathBuf> {
    Ok(socket_dir()?.join("default"))
}

pub fn lock_path() -> Result<PathBuf> {
    let mut p = socket_path()?.into_os_string();
    p.push(".lock");
    Ok(PathBuf::from(p))
}

pub fn keybind_config_path() -> Result<PathBuf> {
    Ok(socket_dir()?.join("keybinds.json"))
}

fn ensure_dir_0700(dir: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(MuxError::Io)?;
    }
    let mut perms = std::fs::metadata(dir).map_err(MuxError::Io)?.permissions();
    perms.set_mode(0o700);
    std::fs::set_permissions(dir, perms).map_err(MuxError::Io)?;
    Ok(())
}
