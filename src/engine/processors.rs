//! Event processors: one pure function per event kind.
//!
//! Each processor takes the raw event and the state left by the previous event
//! and returns the deltas and new state. No I/O happens here, which is what
//! makes a replay reproducible.

use super::price::value_in_quote;
use super::{EventDelta, EventPayload, PreviousEventState, ProcessError, ProcessedEvent};
use crate::domain::{Amount, BlockchainEventType, PoolMetadata, PriceSnapshot, RawEvent, Reward};

/// Dispatch a raw event to its processor.
pub fn process_event(
    event: &RawEvent,
    prev: &PreviousEventState,
    basis: &PriceSnapshot,
    pool: &PoolMetadata,
) -> Result<ProcessedEvent, ProcessError> {
    match event.event_type {
        BlockchainEventType::IncreaseLiquidity => process_increase(event, prev, basis, pool),
        BlockchainEventType::DecreaseLiquidity => process_decrease(event, prev, basis, pool),
        BlockchainEventType::Collect => process_collect(event, prev, basis, pool),
    }
}

/// Deposit: adds liquidity and cost basis, never realizes PnL.
pub fn process_increase(
    event: &RawEvent,
    prev: &PreviousEventState,
    basis: &PriceSnapshot,
    pool: &PoolMetadata,
) -> Result<ProcessedEvent, ProcessError> {
    check_amounts(event)?;
    let delta_l = liquidity_delta(event)?;
    let token_value = value_in_quote(
        &event.amount0,
        &event.amount1,
        &basis.sqrt_price_x96,
        pool.quote_token,
    )?;

    let state = PreviousEventState {
        uncollected_principal0: prev.uncollected_principal0.clone(),
        uncollected_principal1: prev.uncollected_principal1.clone(),
        liquidity: &prev.liquidity + &delta_l,
        cost_basis: &prev.cost_basis + &token_value,
        pnl: prev.pnl.clone(),
    };

    Ok(ProcessedEvent {
        delta: EventDelta {
            delta_l,
            delta_cost_basis: token_value.clone(),
            token_value,
            ..EventDelta::default()
        },
        state,
        payload: EventPayload::Increase,
    })
}

/// Withdrawal: removes proportional cost basis and realizes PnL against it.
///
/// Withdrawn tokens are not paid out yet; they sit in uncollected principal
/// until a COLLECT.
pub fn process_decrease(
    event: &RawEvent,
    prev: &PreviousEventState,
    basis: &PriceSnapshot,
    pool: &PoolMetadata,
) -> Result<ProcessedEvent, ProcessError> {
    check_amounts(event)?;
    let delta_l = liquidity_delta(event)?;

    if prev.liquidity.is_zero() {
        return Err(ProcessError::Division(format!(
            "decrease at {} against a position with zero liquidity",
            event.coordinates()
        )));
    }
    if delta_l > prev.liquidity {
        return Err(ProcessError::InvalidState(format!(
            "decrease of {} at {} exceeds liquidity {}",
            delta_l,
            event.coordinates(),
            prev.liquidity
        )));
    }

    let proportional_cost_basis = prev
        .cost_basis
        .mul_div_floor(&delta_l, &prev.liquidity)
        .ok_or_else(|| ProcessError::Division("previous liquidity".to_string()))?;
    let token_value = value_in_quote(
        &event.amount0,
        &event.amount1,
        &basis.sqrt_price_x96,
        pool.quote_token,
    )?;
    let delta_pnl = &token_value - &proportional_cost_basis;

    let state = PreviousEventState {
        uncollected_principal0: &prev.uncollected_principal0 + &event.amount0,
        uncollected_principal1: &prev.uncollected_principal1 + &event.amount1,
        liquidity: &prev.liquidity - &delta_l,
        cost_basis: &prev.cost_basis - &proportional_cost_basis,
        pnl: &prev.pnl + &delta_pnl,
    };

    Ok(ProcessedEvent {
        delta: EventDelta {
            delta_l,
            token_value,
            delta_cost_basis: -&proportional_cost_basis,
            delta_pnl,
            ..EventDelta::default()
        },
        state,
        payload: EventPayload::Decrease {
            proportional_cost_basis,
        },
    })
}

/// Payout: splits collected tokens into principal return and fee income.
///
/// Anything collected beyond the uncollected principal is fee. Cost basis,
/// PnL and liquidity are untouched.
pub fn process_collect(
    event: &RawEvent,
    prev: &PreviousEventState,
    basis: &PriceSnapshot,
    pool: &PoolMetadata,
) -> Result<ProcessedEvent, ProcessError> {
    check_amounts(event)?;

    let (principal0, fee0) = split_collected(&event.amount0, &prev.uncollected_principal0);
    let (principal1, fee1) = split_collected(&event.amount1, &prev.uncollected_principal1);

    let token_value = value_in_quote(
        &event.amount0,
        &event.amount1,
        &basis.sqrt_price_x96,
        pool.quote_token,
    )?;

    let mut rewards = Vec::new();
    if fee0.is_positive() {
        rewards.push(Reward {
            token_id: pool.token0.id,
            token_amount: fee0.clone(),
            token_value: value_in_quote(&fee0, &Amount::zero(), &basis.sqrt_price_x96, pool.quote_token)?,
        });
    }
    if fee1.is_positive() {
        rewards.push(Reward {
            token_id: pool.token1.id,
            token_amount: fee1.clone(),
            token_value: value_in_quote(&Amount::zero(), &fee1, &basis.sqrt_price_x96, pool.quote_token)?,
        });
    }

    let state = PreviousEventState {
        uncollected_principal0: &prev.uncollected_principal0 - &principal0,
        uncollected_principal1: &prev.uncollected_principal1 - &principal1,
        liquidity: prev.liquidity.clone(),
        cost_basis: prev.cost_basis.clone(),
        pnl: prev.pnl.clone(),
    };

    Ok(ProcessedEvent {
        delta: EventDelta {
            token_value,
            fees_collected0: fee0.clone(),
            fees_collected1: fee1.clone(),
            rewards,
            ..EventDelta::default()
        },
        state,
        payload: EventPayload::Collect {
            principal0,
            principal1,
            fee0,
            fee1,
        },
    })
}

/// `(principal, fee)` with `principal = min(collected, uncollected)`.
pub fn split_collected(collected: &Amount, uncollected: &Amount) -> (Amount, Amount) {
    let principal = collected.min_of(uncollected);
    let fee = collected - &principal;
    (principal, fee)
}

fn liquidity_delta(event: &RawEvent) -> Result<Amount, ProcessError> {
    let delta_l = event.liquidity.clone().ok_or_else(|| {
        ProcessError::InvalidState(format!(
            "{:?} at {} has no liquidity field",
            event.event_type,
            event.coordinates()
        ))
    })?;
    if delta_l.is_negative() {
        return Err(ProcessError::InvalidState(format!(
            "negative liquidity delta {} at {}",
            delta_l,
            event.coordinates()
        )));
    }
    Ok(delta_l)
}

fn check_amounts(event: &RawEvent) -> Result<(), ProcessError> {
    if event.amount0.is_negative() || event.amount1.is_negative() {
        return Err(ProcessError::InvalidState(format!(
            "negative token amounts ({}, {}) at {}",
            event.amount0,
            event.amount1,
            event.coordinates()
        )));
    }
    Ok(())
}
