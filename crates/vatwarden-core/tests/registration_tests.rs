//! Registry advertisement and resolver binding against fake peers.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rstest::rstest;
use support::{FakePeerLink, FakeRegistrar, FakeResolver, FakeRestorer, PlainService, RecordingTerminator};
use vatwarden_core::{
    Admin, AdminSettings, Capability, ExportedService, RegistrationCoordinator, RegistryEntry,
    ResolverEntry, Restorer, SturdyRef, UnregistrationKey,
};

fn admin_over(services: &[Arc<dyn Capability>]) -> Arc<Admin> {
    Admin::new(
        services,
        AdminSettings::default(),
        Arc::new(RecordingTerminator::default()),
    )
}

fn coordinator(link: FakePeerLink, admin: &Arc<Admin>) -> (Arc<FakePeerLink>, RegistrationCoordinator) {
    let link = Arc::new(link);
    let restorer = Arc::new(FakeRestorer::default());
    restorer.set_port(4711);
    (
        link.clone(),
        RegistrationCoordinator::new(link, restorer, admin.clone()),
    )
}

#[rstest]
#[case::none_fail(vec![true, true, true])]
#[case::first_fails(vec![false, true, true])]
#[case::middle_fails(vec![true, false, true])]
#[case::last_fails(vec![true, true, false])]
#[case::two_fail(vec![false, true, false])]
#[case::all_fail(vec![false, false, false])]
#[tokio::test]
async fn unreachable_registries_do_not_affect_the_others(#[case] reachable: Vec<bool>) {
    let mut link = FakePeerLink::default();
    let mut registries = Vec::new();
    for (index, up) in reachable.iter().enumerate() {
        let token = format!("reg-{index}");
        if *up {
            link = link.with_registrar(&token, FakeRegistrar::accepting());
        }
        registries.push(RegistryEntry::new(&token, "climate", "models"));
    }
    let service: Arc<dyn Capability> = PlainService::new("svc");
    let admin = admin_over(&[service.clone()]);
    let (_, coordinator) = coordinator(link, &admin);

    let report = coordinator
        .advertise(&[ExportedService::new("svc", service)], &registries)
        .await;

    let expected: Vec<UnregistrationKey> = reachable
        .iter()
        .enumerate()
        .filter(|(_, up)| **up)
        .map(|(index, _)| UnregistrationKey::new("svc", format!("reg-{index}")))
        .collect();
    assert_eq!(report.succeeded, expected.len());
    assert_eq!(report.failed, reachable.len() - expected.len());
    assert_eq!(admin.unregistration_keys(), expected);
}

#[tokio::test]
async fn rejected_registration_does_not_stop_later_registries() {
    let rejecting = FakeRegistrar::rejecting();
    let accepting = FakeRegistrar::accepting();
    let link = FakePeerLink::default()
        .with_registrar("picky", rejecting.clone())
        .with_registrar("open", accepting.clone());
    let service: Arc<dyn Capability> = PlainService::new("svc");
    let admin = admin_over(&[service.clone()]);
    let (_, coordinator) = coordinator(link, &admin);

    let report = coordinator
        .advertise(
            &[ExportedService::new("weather", service)],
            &[
                RegistryEntry::new("picky", "weather", "data"),
                RegistryEntry::new("open", "weather", "data"),
            ],
        )
        .await;

    assert_eq!((report.succeeded, report.failed), (1, 1));
    assert_eq!(rejecting.calls.lock().unwrap().len(), 1);
    assert_eq!(
        accepting.calls.lock().unwrap().as_slice(),
        [("weather".to_string(), "weather".to_string(), "data".to_string())]
    );
    assert_eq!(
        admin.reregistration_token(&UnregistrationKey::new("weather", "open")),
        Some(SturdyRef::new("rereg/weather"))
    );
}

#[tokio::test]
async fn empty_entries_are_skipped_and_tokenless_entries_fail() {
    let service: Arc<dyn Capability> = PlainService::new("svc");
    let admin = admin_over(&[service.clone()]);
    let (link, coordinator) = coordinator(FakePeerLink::default(), &admin);
    let tokenless = RegistryEntry {
        name: Some("orphan".into()),
        ..RegistryEntry::default()
    };

    let report = coordinator
        .advertise(
            &[ExportedService::new("svc", service)],
            &[RegistryEntry::default(), tokenless],
        )
        .await;

    assert_eq!((report.succeeded, report.failed, report.skipped), (0, 1, 1));
    assert!(link.reached().is_empty());
}

#[tokio::test]
async fn every_service_is_offered_to_every_registry_in_order() {
    let link = FakePeerLink::default()
        .with_registrar("r1", FakeRegistrar::accepting())
        .with_registrar("r2", FakeRegistrar::accepting());
    let a: Arc<dyn Capability> = PlainService::new("a");
    let b: Arc<dyn Capability> = PlainService::new("b");
    let admin = admin_over(&[a.clone(), b.clone()]);
    let (link, coordinator) = coordinator(link, &admin);

    let report = coordinator
        .advertise(
            &[ExportedService::new("a", a), ExportedService::new("b", b)],
            &[RegistryEntry::new("r1", "", ""), RegistryEntry::new("r2", "", "")],
        )
        .await;

    assert_eq!(report.succeeded, 4);
    assert_eq!(link.reached(), ["r1", "r2", "r1", "r2"]);
    assert_eq!(admin.unregistration_keys().len(), 4);
}

#[tokio::test]
async fn one_heartbeat_task_per_successful_binding() {
    let first = FakeResolver::accepting(30);
    let rejecting = FakeResolver::rejecting();
    let last = FakeResolver::accepting(60);
    let link = FakePeerLink::default()
        .with_resolver("res-1", first.clone())
        .with_resolver("res-bad", rejecting.clone())
        .with_resolver("res-3", last.clone());
    let admin = admin_over(&[]);
    let (link, coordinator) = coordinator(link, &admin);

    let report = coordinator
        .bind(&[
            ResolverEntry::new("res-1", Some("climate-vat".into())),
            ResolverEntry::new("res-down", None),
            ResolverEntry::new("res-bad", None),
            ResolverEntry::default(),
            ResolverEntry::new("res-3", None),
        ])
        .await;

    assert_eq!((report.bound, report.failed, report.skipped), (2, 2, 1));
    assert_eq!(link.reached(), ["res-1", "res-down", "res-bad", "res-3"]);

    let statuses = admin.tasks().statuses();
    let labels: Vec<_> = statuses.iter().map(|s| s.resolver.as_str()).collect();
    assert_eq!(labels, ["climate-vat", "res-3"]);
    assert_eq!(statuses[0].interval, Duration::from_secs(30));

    let sent = first.registrations.lock().unwrap()[0].clone();
    assert_eq!(sent.host, "10.0.0.7");
    assert_eq!(sent.port, 4711);
    assert_eq!(sent.base64_vat_id, "dmF0LWlk");
    assert_eq!(sent.identity_proof, "signed");
    assert_eq!(sent.alias.as_deref(), Some("climate-vat"));
    assert_eq!(last.registrations.lock().unwrap()[0].alias, None);
}

#[tokio::test]
async fn no_tasks_when_every_binding_fails() {
    let link = FakePeerLink::default().with_resolver("res-bad", FakeResolver::rejecting());
    let admin = admin_over(&[]);
    let (_, coordinator) = coordinator(link, &admin);

    let report = coordinator
        .bind(&[
            ResolverEntry::new("res-down", None),
            ResolverEntry::new("res-bad", None),
        ])
        .await;

    assert_eq!((report.bound, report.failed), (0, 2));
    assert!(admin.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn bound_resolvers_receive_periodic_beats() {
    let resolver = FakeResolver::accepting(10);
    let link = FakePeerLink::default().with_resolver("res", resolver.clone());
    let admin = admin_over(&[]);
    let (_, coordinator) = coordinator(link, &admin);

    coordinator.bind(&[ResolverEntry::new("res", None)]).await;
    assert_eq!(resolver.heartbeat.beats.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(resolver.heartbeat.beats.load(Ordering::SeqCst), 2);

    admin.tasks().cancel_all();
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(resolver.heartbeat.beats.load(Ordering::SeqCst), 2);
}
