//! Nervos DAO compensation period arithmetic.
//!
//! A deposit only becomes claimable on a boundary of its 180-epoch compensation cycle,
//! measured from the deposit epoch. All math is integer; timestamps are milliseconds.

use serde::{Deserialize, Serialize};
use snafu::OptionExt;

use crate::epoch::EpochInfo;
use crate::error::*;

pub const WITHDRAW_EPOCHS: u64 = 180;
pub const IMMATURE_EPOCHS: u64 = 4;
pub const HOURS_PER_EPOCH: u64 = 4;
pub const EPOCHS_PER_DAY: u64 = 24 / HOURS_PER_EPOCH;
pub const MILLISECONDS_PER_EPOCH: u64 = HOURS_PER_EPOCH * 60 * 60 * 1000;
/// Epochs before the deadline inside which withdrawing is flagged as risky.
pub const WITHDRAW_ALERT_EPOCHS: i64 = 5;

/// Start of the suggested window, as a fraction of the cycle (0.9).
pub const SUGGEST_START_PERMILLE: u64 = 900;
/// Start of the request window, as a fraction of the cycle (0.967).
pub const REQUEST_START_PERMILLE: u64 = 967;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawAlert {
    pub epochs: u64,
    pub days: u64,
    pub next_cycle_epochs: u64,
    pub next_cycle_days: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationPeriod {
    pub target_epoch_number: u64,
    /// `target - reference - 1`; -1 when the boundary falls inside the reference epoch.
    pub epochs_remaining: i64,
    pub is_immature: bool,
    pub days_remaining: u64,
    pub suggested_start_timestamp: u64,
    pub request_start_timestamp: u64,
    pub ending_timestamp: u64,
    pub withdraw_alert: Option<WithdrawAlert>,
}

/// Epoch number at which a deposit made at `deposit` can be claimed, given the
/// reference epoch (current epoch, or the withdraw epoch once withdrawn).
pub fn claim_epoch_number(deposit: &EpochInfo, reference: &EpochInfo) -> Result<u64> {
    let mut deposited_epochs = reference.number.saturating_sub(deposit.number);
    if reference.number >= deposit.number && reference.cmp_fraction(deposit).is_gt() {
        deposited_epochs = deposited_epochs.saturating_add(1);
    }
    let cycles = deposited_epochs.div_ceil(WITHDRAW_EPOCHS).max(1);
    cycles
        .checked_mul(WITHDRAW_EPOCHS)
        .and_then(|epochs| deposit.number.checked_add(epochs))
        .context(EpochOverflow {
            number: deposit.number,
        })
}

pub fn is_immature(deposit: &EpochInfo, reference: &EpochInfo) -> bool {
    reference.number < deposit.number.saturating_add(IMMATURE_EPOCHS)
}

/// Rounds half up, matching how remaining days are shown to users.
pub fn epochs_to_days(epochs: u64) -> u64 {
    (epochs + EPOCHS_PER_DAY / 2) / EPOCHS_PER_DAY
}

/// Computes the compensation period of a deposit.
///
/// `reference_start_timestamp` is the timestamp of the first block of `reference`.
pub fn compensation_period(
    deposit: &EpochInfo,
    reference: &EpochInfo,
    reference_start_timestamp: u64,
) -> Result<CompensationPeriod> {
    let target_epoch_number = claim_epoch_number(deposit, reference)?;
    let epochs_remaining = (target_epoch_number as i128 - reference.number as i128 - 1)
        .clamp(i64::MIN as i128, i64::MAX as i128) as i64;
    let is_immature = is_immature(deposit, reference);

    let cycle_start = target_epoch_number - WITHDRAW_EPOCHS;
    let timestamp_at_permille = |epoch_permille: i128| -> u64 {
        let offset_permille = epoch_permille - reference.number as i128 * 1000;
        let ts = reference_start_timestamp as i128
            + offset_permille * MILLISECONDS_PER_EPOCH as i128 / 1000;
        ts.clamp(0, u64::MAX as i128) as u64
    };
    let cycle_start_permille = cycle_start as i128 * 1000;
    let suggested_start_timestamp = timestamp_at_permille(
        cycle_start_permille + (WITHDRAW_EPOCHS * SUGGEST_START_PERMILLE) as i128,
    );
    let request_start_timestamp = timestamp_at_permille(
        cycle_start_permille + (WITHDRAW_EPOCHS * REQUEST_START_PERMILLE) as i128,
    );
    let ending_timestamp = timestamp_at_permille(target_epoch_number as i128 * 1000);

    let remaining = epochs_remaining.max(0) as u64;
    let withdraw_alert = (!is_immature
        && (0..=WITHDRAW_ALERT_EPOCHS).contains(&epochs_remaining))
    .then(|| WithdrawAlert {
        epochs: remaining,
        days: epochs_to_days(remaining),
        next_cycle_epochs: remaining + WITHDRAW_EPOCHS,
        next_cycle_days: epochs_to_days(remaining + WITHDRAW_EPOCHS),
    });

    Ok(CompensationPeriod {
        target_epoch_number,
        epochs_remaining,
        is_immature,
        days_remaining: epochs_to_days(remaining),
        suggested_start_timestamp,
        request_start_timestamp,
        ending_timestamp,
        withdraw_alert,
    })
}
