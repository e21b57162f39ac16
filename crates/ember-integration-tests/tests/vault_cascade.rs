//! Integration test: cascading settlement from markets through a vault.
//!
//! 1. Vault supplies to a market and two depositors split its rewards
//! 2. Share transfers move future entitlement, never past accruals
//! 3. Rewards reaching a vault without shares are stranded, not redistributed

use ember_engine::AccrualError;
use ember_integration_tests::{
    memory_engine, program_accrual, with_schedule, ALICE, BOB, CAROL, MARKET, VAULT,
};
use ember_types::entities::{
    epoch_program_id, vault_position_checkpoint_id, vault_position_id,
    vault_reward_checkpoint_id, VaultPositionCheckpoint, VaultRewardCheckpoint,
};
use ember_types::{Address, Side};

fn from_vaults<S: ember_engine::Store>(engine: &ember_engine::Engine<S>, who: &Address) -> u128 {
    program_accrual(engine, who, &epoch_program_id()).map_or(0, |a| a.from_vaults)
}

#[test]
fn depositors_split_vault_rewards() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 100, 10)]);
    engine.create_vault(VAULT, 0).expect("vault");
    engine
        .on_balance_change(MARKET, VAULT, Side::Supply, 100, 0)
        .expect("vault supplies");
    engine
        .on_vault_share_change(VAULT, None, Some(ALICE), 30, 0)
        .expect("alice deposits");
    engine
        .on_vault_share_change(VAULT, None, Some(BOB), 10, 0)
        .expect("bob deposits");

    assert_eq!(engine.accrued_rewards(ALICE, None, 100).expect("alice"), 750);
    assert_eq!(engine.accrued_rewards(BOB, None, 100).expect("bob"), 250);
    assert_eq!(from_vaults(&engine, &ALICE), 750);

    // the vault itself holds the direct accrual it passed on
    let vault_accrual = program_accrual(&engine, &VAULT, &epoch_program_id()).expect("vault");
    assert_eq!(vault_accrual.direct(), 1_000);
}

#[test]
fn transfer_moves_only_future_rewards() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 200, 10)]);
    engine.create_vault(VAULT, 0).expect("vault");
    engine
        .on_balance_change(MARKET, VAULT, Side::Supply, 1, 0)
        .expect("vault supplies");
    engine
        .on_vault_share_change(VAULT, None, Some(ALICE), 20, 0)
        .expect("mint");
    engine
        .on_vault_share_change(VAULT, Some(ALICE), Some(BOB), 20, 100)
        .expect("transfer");

    assert_eq!(engine.accrued_rewards(ALICE, None, 200).expect("alice"), 1_000);
    assert_eq!(engine.accrued_rewards(BOB, None, 200).expect("bob"), 1_000);

    assert!(matches!(
        engine.on_vault_share_change(VAULT, Some(ALICE), Some(CAROL), 1, 200),
        Err(AccrualError::ShareUnderflow { held: 0, removed: 1, .. })
    ));
}

#[test]
fn donation_to_empty_vault_is_stranded() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 200, 10)]);
    engine.create_vault(VAULT, 0).expect("vault");
    engine
        .on_vault_share_change(VAULT, None, Some(ALICE), 10, 0)
        .expect("deposit");
    engine
        .on_vault_share_change(VAULT, Some(ALICE), None, 10, 0)
        .expect("withdraw");
    engine
        .on_balance_change(MARKET, VAULT, Side::Supply, 100, 0)
        .expect("vault supplies");

    // 1000 units reach the vault while nobody holds its shares
    assert_eq!(engine.accrued_rewards(ALICE, None, 100).expect("alice"), 0);
    let program = epoch_program_id();
    let checkpoint: VaultRewardCheckpoint = engine
        .get(&vault_reward_checkpoint_id(&VAULT, &program).to_string())
        .expect("get")
        .expect("vault checkpoint");
    assert_eq!(checkpoint.stranded, 1_000);
    assert_eq!(checkpoint.accrued, 1_000);

    let alice_position = vault_position_id(&ALICE, &VAULT);
    let alice_checkpoint: Option<VaultPositionCheckpoint> = engine
        .get(&vault_position_checkpoint_id(&alice_position, &program).to_string())
        .expect("get");
    assert_eq!(alice_checkpoint.map_or(0, |c| c.accrued), 0);

    // a later depositor earns from the moment of deposit only
    engine
        .on_vault_share_change(VAULT, None, Some(BOB), 5, 100)
        .expect("bob deposits");
    assert_eq!(engine.accrued_rewards(BOB, None, 200).expect("bob"), 1_000);
    assert_eq!(engine.accrued_rewards(ALICE, None, 200).expect("alice"), 0);

    let report = engine.rewards_report().expect("report");
    assert_eq!(report.vaults.len(), 1);
    assert_eq!(report.vaults[0].stranded, 1_000);
}

#[test]
fn vault_fee_shares_need_a_recipient() {
    let mut engine = memory_engine();
    with_schedule(&mut engine, &[(0, 100, 10)]);
    engine.create_vault(VAULT, 0).expect("vault");
    engine
        .on_balance_change(MARKET, VAULT, Side::Supply, 10, 0)
        .expect("vault supplies");
    engine
        .on_vault_share_change(VAULT, None, Some(ALICE), 3, 0)
        .expect("deposit");

    assert!(matches!(
        engine.accrue_vault_fee(VAULT, 1, 0),
        Err(AccrualError::MissingFeeRecipient { .. })
    ));
    engine
        .set_vault_fee_recipient(VAULT, CAROL, 0)
        .expect("recipient");
    engine.accrue_vault_fee(VAULT, 1, 0).expect("fee");

    assert_eq!(engine.accrued_rewards(ALICE, None, 100).expect("alice"), 750);
    assert_eq!(engine.accrued_rewards(CAROL, None, 100).expect("carol"), 250);
}
