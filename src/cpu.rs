//! Process CPU time sampling via `times(2)`.
//!
//! Returns raw user/system clock ticks; the reporter divides by the tick
//! rate from `sysconf(_SC_CLK_TCK)`. Declared inline to keep the hot path
//! free of binding-crate code.

use crate::error::Error;

#[repr(C)]
struct Tms {
    tms_utime: i64,
    tms_stime: i64,
    tms_cutime: i64,
    tms_cstime: i64,
}

const _: () = assert!(
    std::mem::size_of::<usize>() == 8,
    "CPU time sampling requires a 64-bit target"
);

#[cfg(target_os = "linux")]
const SC_CLK_TCK: i32 = 2;

#[cfg(target_os = "macos")]
const SC_CLK_TCK: i32 = 3;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("CPU time sampling is only supported on Linux and macOS");

extern "C" {
    fn times(buf: *mut Tms) -> i64;
    fn sysconf(name: i32) -> i64;
}

/// Clock ticks per second for converting `times` values to seconds.
pub(crate) fn ticks_per_sec() -> Result<i64, Error> {
    let ticks = unsafe { sysconf(SC_CLK_TCK) };
    if ticks <= 0 {
        return Err(Error::TimeSourceUnavailable("sysconf(_SC_CLK_TCK)"));
    }
    Ok(ticks)
}

/// Sample accumulated (user, system) CPU ticks for the process.
#[inline]
pub(crate) fn cpustamp() -> (i64, i64) {
    let mut buf = Tms {
        tms_utime: 0,
        tms_stime: 0,
        tms_cutime: 0,
        tms_cstime: 0,
    };
    let ret = unsafe { times(&mut buf) };
    debug_assert!(ret != -1, "times() failed");
    (buf.tms_utime, buf.tms_stime)
}
