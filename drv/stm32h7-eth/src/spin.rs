// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded busy-waiting.
//!
//! Several Ethernet events (soft reset completion, MDIO transactions, PHY
//! reset and link) have no interrupt, leaving us no choice but to reload a
//! status register until a condition becomes true. We have no scheduler to
//! sleep on, so we spin, but always against an attempt budget so that a dead
//! PHY or an unclocked peripheral turns into an error instead of a hang.

use core::convert::Infallible;

/// A bounded wait ran out of attempts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimedOut;

/// Failure of [`poll_until`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpinError<E> {
    TimedOut,
    /// The check itself failed; polling stopped at the first failure.
    Check(E),
}

/// Calls `check` up to `attempts` times, until it returns `Ok(true)`.
///
/// Zero attempts never succeeds.
pub fn poll_until<E>(
    attempts: u32,
    mut check: impl FnMut() -> Result<bool, E>,
) -> Result<(), SpinError<E>> {
    for _ in 0..attempts {
        if check().map_err(SpinError::Check)? {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(SpinError::TimedOut)
}

/// Evaluates `pred` up to `attempts` times, until it returns true.
pub fn spin_until(
    attempts: u32,
    mut pred: impl FnMut() -> bool,
) -> Result<(), TimedOut> {
    poll_until(attempts, || Ok::<_, Infallible>(pred())).map_err(|e| match e {
        SpinError::TimedOut => TimedOut,
        SpinError::Check(never) => match never {},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_on_the_last_attempt() {
        let mut calls = 0;
        let r = spin_until(5, || {
            calls += 1;
            calls == 5
        });
        assert_eq!(r, Ok(()));
        assert_eq!(calls, 5);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut calls = 0;
        let r = spin_until(5, || {
            calls += 1;
            false
        });
        assert_eq!(r, Err(TimedOut));
        assert_eq!(calls, 5);
    }

    #[test]
    fn zero_attempts_times_out_without_checking() {
        let mut calls = 0;
        let r = spin_until(0, || {
            calls += 1;
            true
        });
        assert_eq!(r, Err(TimedOut));
        assert_eq!(calls, 0);
    }

    #[test]
    fn check_errors_stop_polling() {
        let mut calls = 0;
        let r = poll_until(10, || {
            calls += 1;
            if calls == 3 {
                Err("bus fault")
            } else {
                Ok(false)
            }
        });
        assert_eq!(r, Err(SpinError::Check("bus fault")));
        assert_eq!(calls, 3);
    }
}
