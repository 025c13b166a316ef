#![allow(clippy::module_name_repetitions)]
//! Process sandbox: on Linux, a seccomp filter that makes connect(2) fail with EACCES when
//! outbound networking is disabled. Listening and accepting keep working. Other platforms
//! only report what was requested.
//!
//! The filter is inherited by every thread created afterwards and by child processes, so
//! a local pipe command cannot open network connections either.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    /// connect(2) is denied for this process and its children.
    ConnectBlocked,
    /// Outbound networking is allowed; nothing installed.
    NotRequested,
    /// Disabled by the operator (`--no-sandbox`).
    Disabled,
    /// Requested, but this platform has no implementation.
    Unsupported,
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxStatus::ConnectBlocked => "connect-blocked",
            SandboxStatus::NotRequested => "outbound-allowed",
            SandboxStatus::Disabled => "disabled",
            SandboxStatus::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Install the sandbox for this process. Call before spawning threads.
pub fn sandbox_init(allow_outbound: bool, enabled: bool) -> std::io::Result<SandboxStatus> {
    if !enabled {
        tracing::warn!(allow_outbound, "sandbox disabled by operator");
        return Ok(SandboxStatus::Disabled);
    }
    if allow_outbound {
        tracing::info!("sandbox: outbound networking intended; connect(2) left open");
        return Ok(SandboxStatus::NotRequested);
    }
    let status = imp::block_connect()?;
    match status {
        SandboxStatus::ConnectBlocked => {
            tracing::info!("sandbox: connect(2) denied for this process and its children")
        }
        SandboxStatus::Unsupported => {
            tracing::warn!("sandbox: connect(2) filter not available on this platform")
        }
        _ => {}
    }
    Ok(status)
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    use super::SandboxStatus;
    use std::io;

    // Classic BPF opcodes and seccomp constants (linux/filter.h, linux/seccomp.h).
    const BPF_LD: u16 = 0x00;
    const BPF_JMP: u16 = 0x05;
    const BPF_RET: u16 = 0x06;
    const BPF_W: u16 = 0x00;
    const BPF_ABS: u16 = 0x20;
    const BPF_JEQ: u16 = 0x10;
    #[cfg(target_arch = "x86_64")]
    const BPF_JGE: u16 = 0x30;
    const BPF_K: u16 = 0x00;

    const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
    const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
    const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;

    #[cfg(target_arch = "x86_64")]
    const AUDIT_ARCH: u32 = 0xc000_003e;
    #[cfg(target_arch = "aarch64")]
    const AUDIT_ARCH: u32 = 0xc000_00b7;

    // struct seccomp_data { int nr; __u32 arch; ... }
    const OFFSET_NR: u32 = 0;
    const OFFSET_ARCH: u32 = 4;

    // x32 syscalls share AUDIT_ARCH_X86_64 and set this bit in the number.
    #[cfg(target_arch = "x86_64")]
    const X32_SYSCALL_BIT: u32 = 0x4000_0000;

    fn stmt(code: u16, k: u32) -> libc::sock_filter {
        libc::sock_filter {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    fn jump(code: u16, k: u32, jt: u8, jf: u8) -> libc::sock_filter {
        libc::sock_filter { code, jt, jf, k }
    }

    fn filter() -> Vec<libc::sock_filter> {
        let mut prog = vec![
            // Foreign syscall ABIs could bypass the number check.
            stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH),
            jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH, 1, 0),
            stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS),
            stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_NR),
        ];
        #[cfg(target_arch = "x86_64")]
        prog.extend([
            jump(BPF_JMP | BPF_JGE | BPF_K, X32_SYSCALL_BIT, 0, 1),
            stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS),
        ]);
        prog.extend([
            jump(BPF_JMP | BPF_JEQ | BPF_K, libc::SYS_connect as u32, 0, 1),
            stmt(BPF_RET | BPF_K, SECCOMP_RET_ERRNO | (libc::EACCES as u32)),
            stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW),
        ]);
        prog
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        /// Run the filter over a `seccomp_data` holding only `nr` and `arch`.
        fn eval(prog: &[libc::sock_filter], nr: u32, arch: u32) -> u32 {
            let mut acc = 0u32;
            let mut pc = 0usize;
            loop {
                let ins = &prog[pc];
                pc += 1;
                match ins.code {
                    c if c == BPF_LD | BPF_W | BPF_ABS => {
                        acc = match ins.k {
                            OFFSET_NR => nr,
                            OFFSET_ARCH => arch,
                            k => panic!("unexpected load offset {k}"),
                        }
                    }
                    c if c == BPF_JMP | BPF_JEQ | BPF_K => {
                        pc += usize::from(if acc == ins.k { ins.jt } else { ins.jf });
                    }
                    #[cfg(target_arch = "x86_64")]
                    c if c == BPF_JMP | BPF_JGE | BPF_K => {
                        pc += usize::from(if acc >= ins.k { ins.jt } else { ins.jf });
                    }
                    c if c == BPF_RET | BPF_K => return ins.k,
                    c => panic!("unexpected opcode {c:#x}"),
                }
            }
        }

        #[test]
        fn connect_is_denied_with_eacces() {
            let nr = libc::SYS_connect as u32;
            assert_eq!(eval(&filter(), nr, AUDIT_ARCH), SECCOMP_RET_ERRNO | libc::EACCES as u32);
        }

        #[test]
        fn other_syscalls_pass() {
            for nr in [libc::SYS_read, libc::SYS_accept4, libc::SYS_bind, libc::SYS_socket] {
                assert_eq!(eval(&filter(), nr as u32, AUDIT_ARCH), SECCOMP_RET_ALLOW);
            }
        }

        #[test]
        fn foreign_arch_is_killed() {
            let nr = libc::SYS_connect as u32;
            assert_eq!(eval(&filter(), nr, 0x4000_0003), SECCOMP_RET_KILL_PROCESS);
        }

        #[cfg(target_arch = "x86_64")]
        #[test]
        fn x32_numbers_are_killed() {
            let nr = X32_SYSCALL_BIT | libc::SYS_connect as u32;
            assert_eq!(eval(&filter(), nr, AUDIT_ARCH), SECCOMP_RET_KILL_PROCESS);
        }
    }

    pub(super) fn block_connect() -> io::Result<SandboxStatus> {
        let mut filt = filter();
        let prog = libc::sock_fprog {
            len: filt.len() as libc::c_ushort,
            filter: filt.as_mut_ptr(),
        };
        // SAFETY: prctl with PR_SET_NO_NEW_PRIVS takes plain integer arguments.
        let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `prog` points at `filt`, which outlives the call; the kernel copies it.
        let rc = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER,
                &prog as *const libc::sock_fprog,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(SandboxStatus::ConnectBlocked)
    }
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
mod imp {
    use super::SandboxStatus;

    pub(super) fn block_connect() -> std::io::Result<SandboxStatus> {
        Ok(SandboxStatus::Unsupported)
    }
}
