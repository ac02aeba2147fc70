//! Millisecond timebase and socket status tracking.
//!
//! [`DiskTick`] is the only state shared with interrupt context. The host
//! calls [`DiskTick::on_tick`] (or [`DiskTick::poll`]) every millisecond; the
//! driver only samples the clock and the status bits through a shared
//! reference.

use crate::status::Status;

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use switch_hal::InputSwitch;

/// Monotonic millisecond source.
pub trait Clock {
    /// Milliseconds since an arbitrary origin, wrapping.
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Point in time after which a wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Deadline {
    start: u32,
    duration: u32,
}

impl Deadline {
    /// Starts a deadline `duration_ms` from now.
    pub fn start<C: Clock>(clock: &C, duration_ms: u32) -> Self {
        Deadline {
            start: clock.now_ms(),
            duration: duration_ms,
        }
    }

    /// Elapsed time reached the duration.
    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        clock.now_ms().wrapping_sub(self.start) >= self.duration
    }
}

/// Card detect and write protect lines.
pub trait Socket {
    /// A card sits in the socket.
    fn card_present(&mut self) -> bool;
    /// The card's write protect tab is set.
    fn write_protected(&mut self) -> bool;
}

/// Socket without detect and protect lines: card always present and writable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedSocket;

impl Socket for FixedSocket {
    fn card_present(&mut self) -> bool {
        true
    }

    fn write_protected(&mut self) -> bool {
        false
    }
}

/// Socket wired to two input switches.
///
/// A failing detect input reads as "no card", a failing protect input as
/// "protected", so a broken line never enables writes to an unknown card.
pub struct SocketSwitches<Cd: InputSwitch, Wp: InputSwitch> {
    card_detect: Cd,
    write_protect: Wp,
}

impl<Cd: InputSwitch, Wp: InputSwitch> SocketSwitches<Cd, Wp> {
    /// Creates a new [`SocketSwitches<Cd, Wp>`].
    ///
    /// `card_detect` - active when a card is inserted.
    /// `write_protect` - active when the card is write protected.
    pub fn new(card_detect: Cd, write_protect: Wp) -> Self {
        SocketSwitches {
            card_detect,
            write_protect,
        }
    }

    /// Releases the inputs.
    pub fn free(self) -> (Cd, Wp) {
        (self.card_detect, self.write_protect)
    }
}

impl<Cd: InputSwitch, Wp: InputSwitch> Socket for SocketSwitches<Cd, Wp> {
    fn card_present(&mut self) -> bool {
        self.card_detect.is_active().unwrap_or(false)
    }

    fn write_protected(&mut self) -> bool {
        self.write_protect.is_active().unwrap_or(true)
    }
}

/// 1 kHz timebase and drive status.
///
/// Meant to live in a `static` shared between the timer interrupt and the
/// driver.
#[derive(Debug)]
pub struct DiskTick {
    millis: AtomicU32,
    status: AtomicU8,
}

impl DiskTick {
    /// Creates a tick at 0 ms with status `NOT_INITIALIZED`.
    pub const fn new() -> Self {
        DiskTick {
            millis: AtomicU32::new(0),
            status: AtomicU8::new(Status::NOT_INITIALIZED.bits()),
        }
    }

    /// Periodic 1 ms callback.
    ///
    /// Advances the clock and mirrors the socket lines into the status: a
    /// missing card sets `NO_DISK` and `NOT_INITIALIZED`, a present card only
    /// clears `NO_DISK`.
    pub fn on_tick(&self, card_present: bool, write_protected: bool) {
        self.millis.fetch_add(1, Ordering::Relaxed);

        if write_protected {
            self.set(Status::WRITE_PROTECTED);
        } else {
            self.clear(Status::WRITE_PROTECTED);
        }

        if card_present {
            self.clear(Status::NO_DISK);
        } else {
            self.set(Status::NO_DISK | Status::NOT_INITIALIZED);
        }
    }

    /// Periodic 1 ms callback sampling a [`Socket`].
    pub fn poll<S: Socket>(&self, socket: &mut S) {
        let present = socket.card_present();
        let protected = socket.write_protected();
        self.on_tick(present, protected);
    }

    /// Current drive status.
    pub fn status(&self) -> Status {
        Status::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    /// Sets status bits.
    pub(crate) fn set(&self, flags: Status) {
        self.status.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clears status bits.
    pub(crate) fn clear(&self, flags: Status) {
        self.status.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Clears `NOT_INITIALIZED` unless the card was removed meanwhile.
    pub(crate) fn mark_initialized(&self) -> bool {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                if bits & Status::NO_DISK.bits() != 0 {
                    None
                } else {
                    Some(bits & !Status::NOT_INITIALIZED.bits())
                }
            })
            .is_ok()
    }
}

impl Default for DiskTick {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for DiskTick {
    fn now_ms(&self) -> u32 {
        self.millis.load(Ordering::Relaxed)
    }
}
