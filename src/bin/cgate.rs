use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, exit};

/// `commit-gate` installed alongside this alias, else whatever PATH resolves.
fn gate_binary() -> PathBuf {
    let name = format!("commit-gate{}", env::consts::EXE_SUFFIX);
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

fn main() {
    let args: Vec<OsString> = env::args_os().skip(1).collect();
    let binary = gate_binary();

    let status = match Command::new(&binary).args(&args).status() {
        Ok(status) => status,
        Err(err) => {
            eprintln!("cgate: cannot run {}: {err}", binary.display());
            exit(127);
        }
    };
    exit(status.code().unwrap_or(1));
}
