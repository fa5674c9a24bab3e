//! Provider adapters: when they harvest, what they report and the vault guards.

use alloy::primitives::{Address, U256};
use clients_erc20::Token;
use clients_vault::Vault;
use joint::testkit::{HedgeSetup, SimWorld, DAY};
use joint::{AdminCommand, Asset, EpochPhase, JointError, ProviderConfig, StateViolation};

#[tokio::test]
async fn harvest_trigger_follows_the_epoch() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);
    assert!(!world.provider_a.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());

    world.start_epoch().await.unwrap();
    assert!(!world.provider_a.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());
    assert!(!world.provider_b.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());

    world.advance(7 * DAY);
    assert!(world.provider_a.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());
    let report = world.provider_a.harvest(keeper, &mut world.joint).await.unwrap();
    assert!(report.settlement.is_some());
    assert_eq!(world.joint.phase(), EpochPhase::Idle);

    // B still has to report the epoch A closed
    assert!(world.provider_b.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());
    world.provider_b.harvest(keeper, &mut world.joint).await.unwrap();
    assert_eq!(world.joint.phase(), EpochPhase::Open);
    assert!(!world.provider_b.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());

    world
        .provider_b
        .configure(governance, |c| c.launch_harvest = true)
        .unwrap();
    assert!(world.provider_b.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());
    let report = world.provider_b.harvest(keeper, &mut world.joint).await.unwrap();
    assert!(report.settlement.is_none());
    assert!(!world.provider_b.config().launch_harvest);
    assert!(!world.provider_b.harvest_trigger(&world.joint, U256::ZERO).await.unwrap());
}

#[tokio::test]
async fn only_governance_configures_and_limits_are_validated() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);

    let err = world
        .provider_a
        .configure(keeper, |c| c.take_profit = true)
        .unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::Unauthorized { .. })
    ));
    assert!(!world.provider_a.config().take_profit);

    let err = world
        .provider_a
        .configure(governance, |c| c.loss_limit_bps = 10_001)
        .unwrap_err();
    assert!(matches!(err, JointError::Config(_)));

    let err = world
        .provider_a
        .harvest(world.whale, &mut world.joint)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn health_check_blocks_a_large_loss_until_waived() {
    let mut world = SimWorld::builder()
        .hedge(HedgeSetup::None)
        .provider_config(|c| *c = ProviderConfig::default())
        .build()
        .await
        .unwrap();
    world.start_epoch().await.unwrap();
    world.move_price_by(-0.30).await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);
    assert!(world.joint.should_end_epoch().await.unwrap());

    let err = world.provider_a.harvest(keeper, &mut world.joint).await.unwrap_err();
    assert!(matches!(err, JointError::HealthCheckViolation { .. }));
    // refused before anything was unwound
    assert_eq!(world.joint.phase(), EpochPhase::Open);
    assert!(world.joint.loose().is_zero());

    world
        .provider_a
        .configure(governance, |c| c.do_health_check = false)
        .unwrap();
    let report = world.provider_a.harvest(keeper, &mut world.joint).await.unwrap();
    assert!(report.settlement.is_some());
    assert!(!report.loss.is_zero());
    assert!(world.provider_a.config().do_health_check);
}

#[tokio::test]
async fn take_profit_closes_the_epoch_early() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);
    assert!(!world.joint.should_end_epoch().await.unwrap());

    world
        .provider_b
        .configure(governance, |c| c.take_profit = true)
        .unwrap();
    let report = world.provider_b.harvest(keeper, &mut world.joint).await.unwrap();
    assert_eq!(report.settlement.map(|s| s.epoch_id), Some(1));
    assert!(!world.provider_b.config().take_profit);
    // A's capital is back with A, so the next epoch waits for A
    assert_eq!(world.joint.phase(), EpochPhase::Idle);
    assert!(report.invested.is_none());

    let report = world.provider_a.harvest(keeper, &mut world.joint).await.unwrap();
    assert_eq!(report.invested, Some(2));
}

#[tokio::test]
async fn forwarded_capital_can_be_pulled_back() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let keeper = world.keeper;
    world.provider_a.harvest(keeper, &mut world.joint).await.unwrap();
    let forwarded = world.joint.pending().a;
    assert_eq!(forwarded, world.token_a.units(10_000));
    assert!(world.provider_a.want_balance().is_zero());

    let pulled = world
        .provider_a
        .withdraw_from_joint(keeper, &mut world.joint)
        .await
        .unwrap();
    assert_eq!(pulled, forwarded);
    assert!(world.joint.pending().is_zero());
    assert_eq!(world.provider_a.want_balance(), forwarded);
}

#[tokio::test]
async fn estimated_assets_track_the_vault_debt() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();

    for (provider, vault) in [
        (&world.provider_a, &world.vault_a),
        (&world.provider_b, &world.vault_b),
    ] {
        let debt = vault.debt(provider.address()).await.unwrap();
        let estimate = provider.estimated_total_assets(&world.joint).await.unwrap();
        assert!(!debt.is_zero());
        assert!(estimate <= debt);
        assert!(estimate > debt * U256::from(99u64) / U256::from(100u64));
    }
}

#[tokio::test]
async fn provider_must_match_the_joint_side() {
    let world = SimWorld::builder().build().await.unwrap();
    let err = joint::ProviderAdapter::new(
        world.provider_a.address(),
        joint::Asset::B,
        world.vault_a.clone(),
        ProviderConfig::default(),
        &world.joint,
    )
    .err()
    .unwrap();
    assert!(matches!(err, JointError::Config(_)));
}

#[tokio::test]
async fn revoked_provider_repays_its_whole_debt_when_the_epoch_ends() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let deposited = world.vault_a.total_assets();
    world.start_epoch().await.unwrap();
    let provider = world.provider_a.address();

    world.vault_a.update_debt_ratio(provider, 0).await.unwrap();
    // the open epoch is not interrupted
    assert_eq!(world.joint.phase(), EpochPhase::Open);

    world.advance(7 * DAY);
    let (a, b) = world.harvest_providers().await.unwrap();
    assert!(a.settlement.is_some());
    assert!(a.debt_outstanding.is_zero());
    assert!(world.vault_a.debt(provider).await.unwrap().is_zero());
    assert!(world.provider_a.want_balance().is_zero());
    assert_eq!(world.vault_a.idle(), deposited - a.loss);

    // B waits for an A side that is not coming
    assert!(b.invested.is_none());
    assert!(world.joint.pending().a.is_zero());
    assert!(!world.joint.ready_to_invest());
    assert_eq!(world.joint.phase(), EpochPhase::Idle);
}

#[tokio::test]
async fn migration_hands_want_and_the_open_epoch_to_the_new_provider() {
    let mut world = SimWorld::builder()
        .provider_config(|c| c.invest_want = false)
        .build()
        .await
        .unwrap();
    let (governance, keeper) = (world.governance, world.keeper);
    let old_address = world.provider_a.address();
    world.provider_a.harvest(keeper, &mut world.joint).await.unwrap();
    let held = world.provider_a.want_balance();
    assert!(!held.is_zero());

    let new_address = Address::with_last_byte(0xb3);
    let err = world
        .provider_a
        .migrate(keeper, new_address, &mut world.joint)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::Unauthorized { .. })
    ));

    let migrated = world
        .provider_a
        .migrate(governance, new_address, &mut world.joint)
        .await
        .unwrap();
    let mut old = std::mem::replace(&mut world.provider_a, migrated);
    assert_eq!(world.joint.provider(Asset::A), new_address);
    assert_eq!(world.provider_a.address(), new_address);
    assert!(old.want_balance().is_zero());
    assert_eq!(world.provider_a.want_balance(), held);
    assert_eq!(world.vault_a.debt(new_address).await.unwrap(), held);
    assert!(world.vault_a.debt(old_address).await.unwrap().is_zero());

    let err = old.harvest(keeper, &mut world.joint).await.unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::NotProvider(address)) if address == old_address
    ));
    assert!(old
        .estimated_total_assets(&world.joint)
        .await
        .unwrap()
        .is_zero());

    for provider in [&mut world.provider_a, &mut world.provider_b] {
        provider.configure(governance, |c| c.invest_want = true).unwrap();
    }
    world.start_epoch().await.unwrap();
    let provided = world.joint.epoch().unwrap().provided.a;
    assert_eq!(provided + world.provider_a.want_balance(), held);

    // an open epoch carries on and settles to whoever is the provider by then
    let newest = Address::with_last_byte(0xb4);
    let migrated = world
        .provider_a
        .migrate(governance, newest, &mut world.joint)
        .await
        .unwrap();
    world.provider_a = migrated;
    world.advance(7 * DAY);
    let (a, _) = world.harvest_providers().await.unwrap();
    assert!(a.settlement.is_some());
    assert_eq!(a.provider, newest);

    let retired = world.vault_a.strategy_params(new_address).await.unwrap();
    assert!(retired.total_loss.is_zero() && retired.total_debt.is_zero());
    let current = world.vault_a.strategy_params(newest).await.unwrap();
    assert_eq!(current.total_loss, a.loss);
}

#[tokio::test]
async fn provider_cannot_be_pointed_at_the_other_side() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let governance = world.governance;
    let other = world.provider_b.address();

    let err = world
        .joint
        .administer(
            governance,
            AdminCommand::SetProvider {
                asset: Asset::A,
                address: other,
            },
        )
        .unwrap_err();
    assert!(matches!(err, JointError::Config(_)));
    let err = world
        .provider_a
        .migrate(governance, Address::ZERO, &mut world.joint)
        .await
        .unwrap_err();
    assert!(matches!(err, JointError::Config(_)));
    assert_eq!(world.joint.provider(Asset::A), world.provider_a.address());
}

#[tokio::test]
async fn sweep_returns_stray_tokens_but_never_want_or_shares() {
    let world = SimWorld::builder().build().await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);
    let provider = world.provider_a.address();

    world.reward.mint(provider, world.reward.units(7)).unwrap();
    let err = world.provider_a.sweep(keeper, &world.reward).unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::Unauthorized { .. })
    ));

    let before = world.reward.balance_of(governance);
    let swept = world.provider_a.sweep(governance, &world.reward).unwrap();
    assert_eq!(swept, world.reward.units(7));
    assert_eq!(world.reward.balance_of(governance), before + swept);
    assert!(world.reward.balance_of(provider).is_zero());

    let err = world.provider_a.sweep(governance, &world.token_a).unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::ProtectedToken { reason: "want", .. })
    ));
    let shares = Token::new(world.vault_a.address(), "yvA", 18);
    let err = world.provider_a.sweep(governance, &shares).unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::ProtectedToken { reason: "vault shares", .. })
    ));
}
