//! Interrupt controller abstraction.
//!
//! On a uniprocessor kernel, disabling interrupts around a short critical
//! section is the cheapest mutual-exclusion primitive for state that an
//! interrupt handler may also touch.

/// A trait for controlling CPU interrupts.
///
/// This trait abstracts over the hardware-specific details of enabling and
/// disabling interrupts.
pub trait InterruptController {
    /// Runs the closure with interrupts disabled, restoring the previous
    /// interrupt state afterwards.
    fn without_interrupts<F, R>(f: F) -> R
    where
        F: FnOnce() -> R;
}

/// An implementation of `InterruptController` for the x86_64 architecture.
#[cfg(target_os = "none")]
pub struct X64InterruptController;

#[cfg(target_os = "none")]
impl InterruptController for X64InterruptController {
    fn without_interrupts<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        x86_64::instructions::interrupts::without_interrupts(f)
    }
}

/// Hosted builds (the std test suite) have no interrupt flag to toggle;
/// the closure runs as-is.
#[cfg(not(target_os = "none"))]
pub struct HostInterruptController;

#[cfg(not(target_os = "none"))]
impl InterruptController for HostInterruptController {
    fn without_interrupts<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        f()
    }
}

/// The interrupt controller for the current build target.
#[cfg(target_os = "none")]
pub type PlatformInterrupts = X64InterruptController;

/// The interrupt controller for the current build target.
#[cfg(not(target_os = "none"))]
pub type PlatformInterrupts = HostInterruptController;
