//! Child processes on posix, spawned with posix_spawn.
//!
//! We don't use Rust's process spawning because we want both stdout and
//! stderr in the same pipe, which the std::process API cannot do, and we want
//! each child in its own process group so a timeout can kill everything the
//! command started, not just the shell.

use anyhow::bail;
use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    /// Exited unsuccessfully; describes how.
    Failure(String),
}

/// For calls that return -1 and set errno.
fn check_errno(func: &str, ret: libc::c_int) -> anyhow::Result<libc::c_int> {
    if ret < 0 {
        bail!("{}: {}", func, std::io::Error::last_os_error());
    }
    Ok(ret)
}

/// For the posix_spawn family, which returns the error number.
fn check_posix(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret != 0 {
        bail!("{}: {}", func, std::io::Error::from_raw_os_error(ret));
    }
    Ok(())
}

/// Wraps libc::posix_spawn_file_actions_t, in particular to implement Drop.
struct PosixSpawnFileActions(libc::posix_spawn_file_actions_t);

impl PosixSpawnFileActions {
    fn new() -> anyhow::Result<Self> {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            check_posix(
                "posix_spawn_file_actions_init",
                libc::posix_spawn_file_actions_init(&mut actions),
            )?;
            Ok(Self(actions))
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.0
    }

    fn adddup2(&mut self, fd: RawFd, newfd: RawFd) -> anyhow::Result<()> {
        unsafe {
            check_posix(
                "posix_spawn_file_actions_adddup2",
                libc::posix_spawn_file_actions_adddup2(&mut self.0, fd, newfd),
            )
        }
    }

    fn addclose(&mut self, fd: RawFd) -> anyhow::Result<()> {
        unsafe {
            check_posix(
                "posix_spawn_file_actions_addclose",
                libc::posix_spawn_file_actions_addclose(&mut self.0, fd),
            )
        }
    }
}

impl Drop for PosixSpawnFileActions {
    fn drop(&mut self) {
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
    }
}

/// Wraps libc::posix_spawnattr_t.
struct PosixSpawnAttr(libc::posix_spawnattr_t);

impl PosixSpawnAttr {
    /// Attributes that put the child in a new process group of its own.
    fn new_process_group() -> anyhow::Result<Self> {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            check_posix("posix_spawnattr_init", libc::posix_spawnattr_init(&mut attr))?;
            let mut attr = Self(attr);
            check_posix(
                "posix_spawnattr_setflags",
                libc::posix_spawnattr_setflags(
                    &mut attr.0,
                    libc::POSIX_SPAWN_SETPGROUP as libc::c_short,
                ),
            )?;
            check_posix(
                "posix_spawnattr_setpgroup",
                libc::posix_spawnattr_setpgroup(&mut attr.0, 0),
            )?;
            Ok(attr)
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.0
    }
}

impl Drop for PosixSpawnAttr {
    fn drop(&mut self) {
        unsafe { libc::posix_spawnattr_destroy(&mut self.0) };
    }
}

fn set_cloexec(fd: RawFd) -> anyhow::Result<()> {
    unsafe {
        let flags = check_errno("fcntl", libc::fcntl(fd, libc::F_GETFD))?;
        check_errno(
            "fcntl",
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC),
        )?;
    }
    Ok(())
}

/// A running `/bin/sh -c` command whose stdout and stderr go to one pipe.
/// The caller reads the pipe; the process is killed if dropped while running.
#[derive(Debug)]
pub struct Process {
    pid: libc::pid_t,
    pipe: File,
    reaped: bool,
}

impl Process {
    pub fn spawn(cmdline: &str) -> anyhow::Result<Process> {
        let cmdline_nul = std::ffi::CString::new(cmdline)?;
        let (pid, pipe) = unsafe {
            let mut pipe: [libc::c_int; 2] = [0; 2];
            check_errno("pipe", libc::pipe(pipe.as_mut_ptr()))?;
            // Neither end may leak into children spawned later.  dup2 clears
            // the flag on the copies the child itself uses.
            set_cloexec(pipe[0])?;
            set_cloexec(pipe[1])?;

            let mut actions = PosixSpawnFileActions::new()?;
            // stdout/stderr => pipe
            actions.adddup2(pipe[1], 1)?;
            actions.adddup2(pipe[1], 2)?;
            // close pipe in child
            actions.addclose(pipe[0])?;
            actions.addclose(pipe[1])?;
            let attr = PosixSpawnAttr::new_process_group()?;

            let path = b"/bin/sh\0".as_ptr() as *const libc::c_char;
            let argv: [*const libc::c_char; 4] = [
                path,
                b"-c\0".as_ptr() as *const libc::c_char,
                cmdline_nul.as_ptr(),
                std::ptr::null(),
            ];

            let mut pid: libc::pid_t = 0;
            let ret = libc::posix_spawn(
                &mut pid,
                path,
                actions.as_ptr(),
                attr.as_ptr(),
                argv.as_ptr() as *const *mut libc::c_char,
                environ(),
            );
            libc::close(pipe[1]);
            if let Err(err) = check_posix("posix_spawn", ret) {
                libc::close(pipe[0]);
                return Err(err);
            }

            (pid, File::from_raw_fd(pipe[0]))
        };
        tracing::debug!(pid, cmdline, "spawned");
        Ok(Process {
            pid,
            pipe,
            reaped: false,
        })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// The read end of the output pipe.
    pub fn fd(&self) -> RawFd {
        self.pipe.as_raw_fd()
    }

    /// Waits for the process to exit.  Call once its output hit EOF.
    pub fn wait(&mut self) -> anyhow::Result<Termination> {
        let status = unsafe {
            let mut status: libc::c_int = 0;
            loop {
                let ret = libc::waitpid(self.pid, &mut status, 0);
                if ret < 0 && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted
                {
                    continue;
                }
                check_errno("waitpid", ret)?;
                break;
            }
            std::process::ExitStatus::from_raw(status)
        };
        self.reaped = true;

        if status.success() {
            return Ok(Termination::Success);
        }
        Ok(match (status.code(), status.signal()) {
            (_, Some(libc::SIGINT)) => Termination::Interrupted,
            (_, Some(sig)) => Termination::Failure(format!("killed by signal {}", sig)),
            (Some(code), None) => Termination::Failure(format!("exit code {}", code)),
            (None, None) => Termination::Failure(format!("status {:?}", status)),
        })
    }

    /// Kills the whole process group and reaps the process.
    pub fn kill(&mut self) {
        if self.reaped {
            return;
        }
        unsafe {
            libc::kill(-self.pid, libc::SIGKILL);
            let mut status: libc::c_int = 0;
            libc::waitpid(self.pid, &mut status, 0);
        }
        self.reaped = true;
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.kill();
    }
}

fn environ() -> *const *mut libc::c_char {
    extern "C" {
        static environ: *const *mut libc::c_char;
    }
    // Safety: environ is the process environment, valid for the life of the
    // process; we don't modify it while spawning.
    unsafe { environ }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn run(cmdline: &str) -> (Termination, String) {
        let mut p = Process::spawn(cmdline).unwrap();
        let mut out = String::new();
        p.pipe.read_to_string(&mut out).unwrap();
        (p.wait().unwrap(), out)
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let (term, out) = run("echo hello; echo oops >&2");
        assert_eq!(term, Termination::Success);
        assert_eq!(out, "hello\noops\n");
    }

    #[test]
    fn reports_exit_code() {
        let (term, _) = run("exit 3");
        assert_eq!(term, Termination::Failure("exit code 3".into()));
    }

    #[test]
    fn kill_stops_process_group() {
        let mut p = Process::spawn("sleep 30; echo never").unwrap();
        p.kill();
        let mut out = String::new();
        p.pipe.read_to_string(&mut out).unwrap();
        assert_eq!(out, "");
    }
}
