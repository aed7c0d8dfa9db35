use chrono::{DateTime, Duration, Utc};
use monitor::engine::Engine;
use monitor::errors::Error;
use monitor::model::{
    Actor, Alarm, AlarmFilter, AlarmType, AuditAction, AuditQuery, Device, DeviceStatus,
    DeviceUpdate, NewDevice, NewManufacturer, NewReading, ReadingQuery,
};
use monitor::store::{MemoryStore, Store};
use std::collections::HashMap;
use std::sync::Arc;

fn setup() -> (Arc<MemoryStore>, Engine) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone());
    (store, engine)
}

async fn device_on(engine: &Engine, code: &str) -> Device {
    engine
        .create_device(
            &Actor::named("alice"),
            NewDevice {
                status: DeviceStatus::On,
                alert_temp_min: Some(10.0),
                alert_temp_max: Some(30.0),
                alert_humidity_min: Some(20.0),
                alert_humidity_max: Some(80.0),
                ..NewDevice::named("Freezer", code)
            },
        )
        .await
        .unwrap()
}

fn reading(device: &Device, temperature: f64, at: DateTime<Utc>) -> NewReading {
    NewReading {
        device_id: device.id,
        temperature,
        humidity: 50.0,
        timestamp: Some(at),
    }
}

async fn open_alarms(store: &MemoryStore, device: &Device) -> Vec<Alarm> {
    store
        .list_alarms(&AlarmFilter {
            device: Some(device.id),
            acknowledged: Some(false),
            active: Some(true),
        })
        .await
        .unwrap()
}

/// No (device, type) pair may ever have two open alarms.
async fn assert_unique_open(store: &MemoryStore) {
    let mut seen = HashMap::new();
    for alarm in store.list_alarms(&AlarmFilter::default()).await.unwrap() {
        if alarm.is_open() {
            let count = seen.entry((alarm.device_id, alarm.alarm_type)).or_insert(0);
            *count += 1;
            assert_eq!(*count, 1, "duplicate open alarm {:?}", alarm);
        }
    }
}

#[tokio::test]
async fn test_threshold_alarms_use_reading_timestamp() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let at = Utc::now() - Duration::hours(2);

    let hot = engine.ingest(reading(&device, 35.0, at)).await.unwrap();
    assert_eq!(hot.alarms.len(), 1);
    assert_eq!(hot.alarms[0].alarm_type, AlarmType::TempHigh);
    assert_eq!(hot.alarms[0].triggered_value, Some(35.0));
    assert_eq!(hot.alarms[0].timestamp, at);

    let cold = engine
        .ingest(reading(&device, 5.0, at + Duration::minutes(15)))
        .await
        .unwrap();
    assert_eq!(cold.alarms.len(), 1);
    assert_eq!(cold.alarms[0].alarm_type, AlarmType::TempLow);
    assert_eq!(cold.alarms[0].triggered_value, Some(5.0));

    let normal = engine
        .ingest(reading(&device, 20.0, at + Duration::minutes(30)))
        .await
        .unwrap();
    assert!(normal.alarms.is_empty());

    assert_unique_open(&store).await;
}

#[tokio::test]
async fn test_dedup_then_acknowledge_reopens() {
    let (store, engine) = setup();
    let device = engine
        .create_device(
            &Actor::anonymous(),
            NewDevice {
                status: DeviceStatus::On,
                alert_temp_max: Some(30.0),
                ..NewDevice::named("Fridge", "F-1")
            },
        )
        .await
        .unwrap();
    let t0 = Utc::now();

    let first = engine.ingest(reading(&device, 32.0, t0)).await.unwrap();
    assert_eq!(first.alarms.len(), 1);

    let second = engine
        .ingest(reading(&device, 35.0, t0 + Duration::minutes(1)))
        .await
        .unwrap();
    assert!(second.alarms.is_empty());
    let open = open_alarms(&store, &device).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].triggered_value, Some(32.0));

    let acked = engine.acknowledge(&Actor::named("bob"), open[0].id).await.unwrap();
    assert!(acked.acknowledged);
    assert!(acked.active);

    let third = engine
        .ingest(reading(&device, 36.0, t0 + Duration::minutes(2)))
        .await
        .unwrap();
    assert_eq!(third.alarms.len(), 1);
    assert_eq!(third.alarms[0].triggered_value, Some(36.0));

    let all = store
        .list_alarms(&AlarmFilter {
            device: Some(device.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|a| a.acknowledged).count(), 1);
    assert_eq!(all.iter().filter(|a| a.is_open()).count(), 1);
}

#[tokio::test]
async fn test_off_device_readings_do_not_alarm() {
    let (store, engine) = setup();
    let device = engine
        .create_device(
            &Actor::anonymous(),
            NewDevice {
                alert_temp_max: Some(30.0),
                ..NewDevice::named("Fridge", "F-1")
            },
        )
        .await
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Off);

    let ingested = engine.ingest(reading(&device, 60.0, Utc::now())).await.unwrap();
    assert!(ingested.alarms.is_empty());
    assert!(store.list_alarms(&AlarmFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_creation_raises_no_status_alarms() {
    let (store, engine) = setup();
    engine
        .create_device(
            &Actor::anonymous(),
            NewDevice {
                button_stop_enabled: false,
                mute_button_enabled: false,
                ..NewDevice::named("Fridge", "F-1")
            },
        )
        .await
        .unwrap();
    assert!(store.list_alarms(&AlarmFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_off_is_idempotent() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let actor = Actor::named("alice");

    let updated = engine
        .update_device(&actor, device.id, DeviceUpdate::status(DeviceStatus::Off))
        .await
        .unwrap();
    assert_eq!(updated.alarms.len(), 1);
    assert_eq!(updated.alarms[0].alarm_type, AlarmType::Disconnected);
    assert_eq!(updated.alarms[0].triggered_value, None);

    for _ in 0..3 {
        let again = engine
            .update_device(&actor, device.id, DeviceUpdate::status(DeviceStatus::Off))
            .await
            .unwrap();
        assert!(again.alarms.is_empty());
    }
    assert_eq!(open_alarms(&store, &device).await.len(), 1);

    // Readings while off are stored but never evaluated.
    let ingested = engine.ingest(reading(&device, 90.0, Utc::now())).await.unwrap();
    assert!(ingested.alarms.is_empty());
}

#[tokio::test]
async fn test_status_alarm_persists_after_switching_back_on() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let actor = Actor::anonymous();

    engine
        .update_device(&actor, device.id, DeviceUpdate::status(DeviceStatus::Off))
        .await
        .unwrap();
    let back_on = engine
        .update_device(&actor, device.id, DeviceUpdate::status(DeviceStatus::On))
        .await
        .unwrap();
    assert!(back_on.alarms.is_empty());

    let open = open_alarms(&store, &device).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alarm_type, AlarmType::Disconnected);
}

#[tokio::test]
async fn test_button_flags_raise_independent_alarms() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;

    let update = DeviceUpdate {
        button_stop_enabled: Some(false),
        mute_button_enabled: Some(false),
        ..Default::default()
    };
    let updated = engine
        .update_device(&Actor::anonymous(), device.id, update)
        .await
        .unwrap();

    let mut types: Vec<AlarmType> = updated.alarms.iter().map(|a| a.alarm_type).collect();
    types.sort_by_key(|t| t.as_str());
    assert_eq!(types, vec![AlarmType::MuteDisabled, AlarmType::StopDisabled]);
    assert_unique_open(&store).await;
}

#[tokio::test]
async fn test_unrelated_update_still_checks_state() {
    let (_store, engine) = setup();
    let device = engine
        .create_device(&Actor::anonymous(), NewDevice::named("Fridge", "F-1"))
        .await
        .unwrap();

    // Created off: the first update of any field raises DC.
    let update = DeviceUpdate {
        location: Some("Lab 2".to_string()),
        ..Default::default()
    };
    let updated = engine
        .update_device(&Actor::anonymous(), device.id, update)
        .await
        .unwrap();
    assert_eq!(updated.device.location, "Lab 2");
    assert_eq!(updated.alarms.len(), 1);
    assert_eq!(updated.alarms[0].alarm_type, AlarmType::Disconnected);
}

#[tokio::test]
async fn test_invalid_update_is_not_applied() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;

    let update = DeviceUpdate {
        status: Some(DeviceStatus::Off),
        alert_temp_min: Some(Some(50.0)),
        ..Default::default()
    };
    let err = engine
        .update_device(&Actor::anonymous(), device.id, update)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let stored = store.get_device(device.id).await.unwrap().unwrap();
    assert_eq!(stored, device);
    assert!(open_alarms(&store, &device).await.is_empty());
}

#[tokio::test]
async fn test_ingest_rejections() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;

    let missing = NewReading {
        device_id: device.id + 100,
        temperature: 40.0,
        humidity: 50.0,
        timestamp: None,
    };
    assert!(matches!(
        engine.ingest(missing).await,
        Err(Error::NotFound { entity: "Device", .. })
    ));

    let malformed = NewReading {
        temperature: f64::NAN,
        ..reading(&device, 0.0, Utc::now())
    };
    assert!(matches!(engine.ingest(malformed).await, Err(Error::Validation(_))));

    let out_of_range = reading(&device, 500.0, Utc::now());
    assert!(matches!(engine.ingest(out_of_range).await, Err(Error::Validation(_))));

    assert!(store.list_alarms(&AlarmFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_acknowledge_errors() {
    let (_store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let alarm = engine
        .ingest(reading(&device, 45.0, Utc::now()))
        .await
        .unwrap()
        .alarms
        .remove(0);

    engine.acknowledge(&Actor::anonymous(), alarm.id).await.unwrap();
    assert!(matches!(
        engine.acknowledge(&Actor::anonymous(), alarm.id).await,
        Err(Error::AlreadyAcknowledged(id)) if id == alarm.id
    ));
    assert!(matches!(
        engine.acknowledge(&Actor::anonymous(), 424242).await,
        Err(Error::NotFound { entity: "Alarm", .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingestion_opens_one_alarm() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let t0 = Utc::now();

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        let new = reading(&device, 31.0 + i as f64 * 0.1, t0 + Duration::seconds(i));
        handles.push(tokio::spawn(async move { engine.ingest(new).await }));
    }

    let mut opened = 0;
    for handle in handles {
        opened += handle.await.unwrap().unwrap().alarms.len();
    }

    assert_eq!(opened, 1);
    assert_eq!(open_alarms(&store, &device).await.len(), 1);
    assert_unique_open(&store).await;
}

#[tokio::test]
async fn test_audit_records_actor() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let updated = engine
        .update_device(
            &Actor::named("carol"),
            device.id,
            DeviceUpdate::status(DeviceStatus::Off),
        )
        .await
        .unwrap();
    engine
        .acknowledge(&Actor::named("dave"), updated.alarms[0].id)
        .await
        .unwrap();
    engine
        .delete_device(&Actor::anonymous(), device.id)
        .await
        .unwrap();

    let entries = store.list_audit(&AuditQuery::default()).await.unwrap();
    let summary: Vec<(AuditAction, Option<&str>)> = entries
        .iter()
        .map(|e| (e.action, e.actor.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (AuditAction::Delete, None),
            (AuditAction::AckAlarm, Some("dave")),
            (AuditAction::Update, Some("carol")),
            (AuditAction::Create, Some("alice")),
        ]
    );
    assert_eq!(entries[3].changes, "Device 'D-1' created");
}

#[tokio::test]
async fn test_summary() {
    let (_store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let t0 = Utc::now() - Duration::hours(1);

    assert!(matches!(
        engine.summary(device.id, None, None).await,
        Err(Error::NoReadings(_))
    ));

    for (i, t) in [12.0, 18.0, 24.0].into_iter().enumerate() {
        engine
            .ingest(reading(&device, t, t0 + Duration::minutes(15 * i as i64)))
            .await
            .unwrap();
    }

    let all = engine.summary(device.id, None, None).await.unwrap();
    assert_eq!(all.count, 3);
    assert_eq!(all.temperature.avg, 18.0);

    let tail = engine
        .summary(device.id, Some(t0 + Duration::minutes(10)), None)
        .await
        .unwrap();
    assert_eq!(tail.count, 2);
    assert_eq!(tail.temperature.min, 18.0);

    assert!(matches!(
        engine.summary(9999, None, None).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_conflicting_reading_at_same_timestamp() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let t0 = Utc::now();

    let first = engine.ingest(reading(&device, 20.0, t0)).await.unwrap();
    assert!(first.alarms.is_empty());

    // A different measurement for the same instant is refused, not merged
    assert!(matches!(
        engine.ingest(reading(&device, 45.0, t0)).await,
        Err(Error::Conflict(_))
    ));
    assert!(open_alarms(&store, &device).await.is_empty());

    let replay = engine.ingest(reading(&device, 20.0, t0)).await.unwrap();
    assert_eq!(replay.reading, first.reading);

    let stored = store
        .list_readings(&ReadingQuery {
            device_id: Some(device.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_replayed_reading_does_not_reopen_acknowledged_alarm() {
    let (store, engine) = setup();
    let device = device_on(&engine, "D-1").await;
    let t0 = Utc::now();

    let first = engine.ingest(reading(&device, 45.0, t0)).await.unwrap();
    assert_eq!(first.alarms.len(), 1);
    engine
        .acknowledge(&Actor::anonymous(), first.alarms[0].id)
        .await
        .unwrap();

    let replay = engine.ingest(reading(&device, 45.0, t0)).await.unwrap();
    assert!(replay.alarms.is_empty());
    assert!(open_alarms(&store, &device).await.is_empty());

    // A new reading past the limit opens a fresh alarm
    let next = engine
        .ingest(reading(&device, 46.0, t0 + Duration::minutes(15)))
        .await
        .unwrap();
    assert_eq!(next.alarms.len(), 1);
}

#[tokio::test]
async fn test_manufacturer_lifecycle_is_audited() {
    let (store, engine) = setup();
    let actor = Actor::named("erin");

    let acme = engine
        .create_manufacturer(&actor, NewManufacturer::named("Acme"))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .create_manufacturer(&actor, NewManufacturer::named("Acme"))
            .await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        engine
            .create_manufacturer(&actor, NewManufacturer::named(" "))
            .await,
        Err(Error::Validation(_))
    ));

    let renamed = engine
        .update_manufacturer(&actor, acme.id, NewManufacturer::named("Acme Labs"))
        .await
        .unwrap();
    assert_eq!(renamed.name, "Acme Labs");
    engine.delete_manufacturer(&actor, acme.id).await.unwrap();
    assert!(matches!(
        engine.delete_manufacturer(&actor, acme.id).await,
        Err(Error::NotFound { entity: "Manufacturer", .. })
    ));

    let entries = store.list_audit(&AuditQuery::default()).await.unwrap();
    let changes: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| (e.model_name.as_str(), e.changes.as_str()))
        .collect();
    assert_eq!(
        changes,
        vec![
            ("Manufacturer", "Manufacturer 'Acme Labs' deleted"),
            ("Manufacturer", "Manufacturer 'Acme Labs' updated"),
            ("Manufacturer", "Manufacturer 'Acme' created"),
        ]
    );
    assert!(entries.iter().all(|e| e.actor.as_deref() == Some("erin")));
}

#[tokio::test]
async fn test_summaries_across_devices() {
    let (_store, engine) = setup();
    let a = device_on(&engine, "A-1").await;
    let b = device_on(&engine, "B-1").await;
    let idle = device_on(&engine, "C-1").await;
    let t0 = Utc::now() - Duration::hours(1);

    engine.ingest(reading(&a, 12.0, t0)).await.unwrap();
    engine
        .ingest(reading(&a, 16.0, t0 + Duration::minutes(15)))
        .await
        .unwrap();
    engine
        .ingest(reading(&b, 20.0, t0 + Duration::minutes(30)))
        .await
        .unwrap();

    let all = engine.summaries(None, None, None).await.unwrap();
    let ids: Vec<i64> = all.iter().map(|s| s.device_id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
    assert_eq!(all[0].temperature.avg, 14.0);

    let selected = engine
        .summaries(Some(&[b.id, idle.id, 9999, b.id]), None, None)
        .await
        .unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].device_id, b.id);

    let ranged = engine
        .summaries(Some(&[a.id]), Some(t0 + Duration::minutes(10)), None)
        .await
        .unwrap();
    assert_eq!(ranged[0].count, 1);

    assert!(matches!(
        engine.summaries(Some(&[]), None, None).await,
        Err(Error::Validation(_))
    ));
}
