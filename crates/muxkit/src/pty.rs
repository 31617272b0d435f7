use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{openpty, OpenptyResult};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A child running in its own session with a pseudo-terminal as its
/// controlling terminal and stdio.
pub struct PtyChild {
	pub child: Child,
	pub pid: u32,
	/// Master side of the pty, non-blocking: read for output, write for input.
	pub master: File,
}

pub fn spawn(commandline: &str, dir: &Path, env: &HashMap<String, String>) -> io::Result<PtyChild> {
	let OpenptyResult { master, slave } = openpty(None, None).map_err(io::Error::from)?;
	set_cloexec(&master)?;
	set_cloexec(&slave)?;
	set_nonblocking(&master)?;

	let mut cmd = Command::new("sh");
	cmd.args(["-c", commandline])
		.current_dir(dir)
		.env_clear()
		.envs(env)
		.stdin(Stdio::from(slave.try_clone()?))
		.stdout(Stdio::from(slave.try_clone()?))
		.stderr(Stdio::from(slave));

	// SAFETY: only async-signal-safe calls (setsid, ioctl) run between fork and exec.
	unsafe {
		cmd.pre_exec(|| {
			nix::unistd::setsid().map_err(io::Error::from)?;
			if nix::libc::ioctl(0, nix::libc::TIOCSCTTY as _, 0) == -1 {
				return Err(io::Error::last_os_error());
			}
			Ok(())
		});
	}

	let child = cmd.spawn()?;
	// the slave must not stay open in the supervisor or output never closes
	drop(cmd);

	let pid = child
		.id()
		.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child reaped before its pid was read"))?;

	Ok(PtyChild {
		child,
		pid,
		master: File::from(master),
	})
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
	fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;
	Ok(())
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
	let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).map_err(io::Error::from)?;
	let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
	fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
	Ok(())
}
