use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use stakeward_core::{Outcome, PricingModel};

/// Financial outcome of a settled commitment. Exactly one of `user_refund`
/// and `charity_donation` is non-zero, and `platform_fee` plus that side
/// always equals the stake to the cent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Split {
    pub platform_fee: Decimal,
    pub user_refund: Decimal,
    pub charity_donation: Decimal,
}

/// Fee breakdown shown at stake time: what happens on either outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeePreview {
    pub stake: Decimal,
    pub success: Split,
    pub failure: Split,
}

const PERCENT_SUCCESS_FEE_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2); // 0.05
const PERCENT_FAILURE_FEE_RATE: Decimal = Decimal::from_parts(25, 0, 0, false, 2); // 0.25
const FLAT_SUCCESS_FEE: Decimal = Decimal::from_parts(495, 0, 0, false, 2); // 4.95
const FLAT_FAILURE_FEE_RATE: Decimal = Decimal::from_parts(30, 0, 0, false, 2); // 0.30

/// Computes the fee split for a stake under the given pricing model.
///
/// The fee is rounded down to cents and the user/charity side takes the
/// remainder, so both sides always sum to the stake with no leftover cent.
pub fn split(model: PricingModel, stake: Decimal, outcome: Outcome) -> Split {
    let fee = match (model, outcome) {
        (PricingModel::Percentage, Outcome::Success) => round_fee(stake * PERCENT_SUCCESS_FEE_RATE),
        (PricingModel::Percentage, Outcome::Failure) => round_fee(stake * PERCENT_FAILURE_FEE_RATE),
        // Flat fee can exceed a tiny stake; clamp so the refund never goes
        // negative.
        (PricingModel::FlatFee, Outcome::Success) => FLAT_SUCCESS_FEE.min(stake),
        (PricingModel::FlatFee, Outcome::Failure) => round_fee(stake * FLAT_FAILURE_FEE_RATE),
    };
    let remainder = stake - fee;

    match outcome {
        Outcome::Success => Split {
            platform_fee: fee,
            user_refund: remainder,
            charity_donation: Decimal::ZERO,
        },
        Outcome::Failure => Split {
            platform_fee: fee,
            user_refund: Decimal::ZERO,
            charity_donation: remainder,
        },
    }
}

pub fn preview(model: PricingModel, stake: Decimal) -> FeePreview {
    FeePreview {
        stake,
        success: split(model, stake, Outcome::Success),
        failure: split(model, stake, Outcome::Failure),
    }
}

fn round_fee(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}
