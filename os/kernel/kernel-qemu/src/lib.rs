//! # QEMU Debug Console
//!
//! Logging for a kernel running under QEMU. Bytes written to I/O port
//! `0x402` show up on the host when QEMU runs with `-debugcon`:
//!
//! ```bash
//! qemu-system-i386 -kernel kernel.bin -debugcon stdio
//! ```
//!
//! ```text
//! log::info!(..) ──▶ QemuLogger ──▶ qemu_trace! ──▶ QemuSink ──▶ outb 0x402
//! ```
//!
//! Without the `enabled` feature, or outside a bare-metal x86 target, every
//! write is a no-op, so host tests may install the logger too.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger installed once");
//! info!("paging enabled");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(all(
    feature = "enabled",
    target_os = "none",
    any(target_arch = "x86", target_arch = "x86_64")
))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's debug console port.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to the debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        unsafe { outb(QEMU_DEBUG_PORT, c) }
    }

    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort: nobody is listening on real hardware.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(all(
    feature = "enabled",
    target_os = "none",
    any(target_arch = "x86", target_arch = "x86_64")
)))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// Write formatted text straight to the debug console, bypassing `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
