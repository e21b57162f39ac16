//! Integration test: end-to-end reward scenarios through the engine facade.
//!
//! 1. Sole supplier across two epochs and a trailing gap
//! 2. Late joiner sharing the second epoch
//! 3. Streams running next to epochs, booked per program
//! 4. Protocol fee shares earning like any other supply

use ember_engine::{AccrualError, ProgramKey};
use ember_integration_tests::{
    memory_engine, market_epoch, program_accrual, with_schedule, ALICE, BOB, CAROL, MARKET,
};
use ember_types::entities::epoch_program_id;
use ember_types::{BySide, Side, SECONDS_PER_YEAR};

#[test]
fn sole_supplier_collects_both_epochs() {
    let mut engine = memory_engine();
    let epochs = with_schedule(&mut engine, &[(0, 100, 10), (100, 200, 5)]);
    engine
        .on_balance_change(MARKET, ALICE, Side::Supply, 100, 0)
        .expect("supply");

    let accrued = engine.accrued_rewards(ALICE, None, 250).expect("query");
    assert_eq!(accrued, 100 * 10 + 100 * 5);

    let first = market_epoch(&engine, &epochs[0]);
    let second = market_epoch(&engine, &epochs[1]);
    assert_eq!(first.total_accrued, 1_000);
    assert_eq!(second.total_accrued, 500);
    assert_eq!(first.last_settled, 100);
    assert_eq!(second.last_settled, 200);
}

#[test]
fn late_joiner_earns_only_after_joining() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 100, 10), (100, 200, 5)]);
    engine
        .on_balance_change(MARKET, ALICE, Side::Supply, 100, 0)
        .expect("alice");
    engine
        .on_balance_change(MARKET, BOB, Side::Supply, 100, 150)
        .expect("bob");

    // 1000 + 250 alone, then half of the last 250
    assert_eq!(engine.accrued_rewards(ALICE, None, 250).expect("alice"), 1_375);
    assert_eq!(engine.accrued_rewards(BOB, None, 250).expect("bob"), 125);
}

#[test]
fn withdrawal_stops_accrual() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 100, 10)]);
    engine
        .on_balance_change(MARKET, ALICE, Side::Supply, 50, 0)
        .expect("alice");
    engine
        .on_balance_change(MARKET, BOB, Side::Supply, 50, 0)
        .expect("bob");
    engine
        .on_balance_change(MARKET, BOB, Side::Supply, -50, 40)
        .expect("bob leaves");

    assert_eq!(engine.accrued_rewards(BOB, None, 100).expect("bob"), 200);
    assert_eq!(engine.accrued_rewards(ALICE, None, 100).expect("alice"), 200 + 600);
}

#[test]
fn streams_and_epochs_are_booked_per_program() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 100, 10)]);
    let program = ProgramKey {
        sender: CAROL,
        reward_token: BOB,
        distributor: CAROL,
    };
    let year = u128::from(SECONDS_PER_YEAR);
    engine
        .on_rate_configured(
            program,
            MARKET,
            BySide {
                supply: 4 * year,
                borrow: year,
                collateral: 0,
            },
            0,
        )
        .expect("rates");
    engine
        .on_balance_change(MARKET, ALICE, Side::Supply, 10, 0)
        .expect("supply");
    engine
        .on_balance_change(MARKET, ALICE, Side::Borrow, 3, 0)
        .expect("borrow");

    assert_eq!(
        engine
            .accrued_rewards(ALICE, Some(epoch_program_id()), 100)
            .expect("epoch program"),
        1_000
    );
    assert_eq!(
        engine
            .accrued_rewards(ALICE, Some(program.id()), 100)
            .expect("stream program"),
        400 + 100
    );
    let accrual = program_accrual(&engine, &ALICE, &program.id()).expect("stream accrual");
    assert_eq!(accrual.accrued.supply, 400);
    assert_eq!(accrual.accrued.borrow, 100);
    assert_eq!(accrual.from_vaults, 0);
}

#[test]
fn rate_change_settles_old_rate_first() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[]);
    let program = ProgramKey {
        sender: CAROL,
        reward_token: CAROL,
        distributor: CAROL,
    };
    let year = u128::from(SECONDS_PER_YEAR);
    let supply_only = |rate| BySide {
        supply: rate,
        borrow: 0,
        collateral: 0,
    };
    engine
        .on_balance_change(MARKET, ALICE, Side::Supply, 1, 0)
        .expect("supply");
    engine
        .on_rate_configured(program, MARKET, supply_only(2 * year), 0)
        .expect("rates");
    engine
        .on_rate_configured(program, MARKET, supply_only(year), 50)
        .expect("lower rates");
    assert_eq!(engine.accrued_rewards(ALICE, None, 150).expect("query"), 100 + 100);
}

#[test]
fn protocol_fee_shares_earn_rewards() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 100, 10)]);
    engine
        .on_balance_change(MARKET, ALICE, Side::Supply, 30, 0)
        .expect("supply");
    assert!(matches!(
        engine.accrue_protocol_fee(MARKET, 10, 0),
        Err(AccrualError::MissingFeeRecipient { .. })
    ));
    engine.set_fee_recipient(CAROL, 0).expect("recipient");
    engine.accrue_protocol_fee(MARKET, 0, 0).expect("zero fee is ignored");
    engine.accrue_protocol_fee(MARKET, 10, 0).expect("fee");

    assert_eq!(engine.accrued_rewards(CAROL, None, 100).expect("fees"), 250);
    assert_eq!(engine.accrued_rewards(ALICE, None, 100).expect("alice"), 750);
}
