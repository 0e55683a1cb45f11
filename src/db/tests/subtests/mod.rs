// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::db::{SectorStore, SectorStoreExt, SettingsStore, SettingsStoreExt};

pub fn read_bin<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "0";
    let value = [1];
    db.write_bin(key, &value).unwrap();
    let res = db.read_bin(key).unwrap().unwrap();
    assert_eq!(value.as_ref(), res.as_slice());
}

pub fn write_read_obj<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "Cthulhu";
    let value = 42;
    db.write_obj(key, &value).unwrap();
    let res: i32 = db.read_obj(key).unwrap().unwrap();
    assert_eq!(value, res);

    // ensure that we are able to overwrite the value.
    let value = 1337;
    db.write_obj(key, &value).unwrap();
    let res: i32 = db.read_obj(key).unwrap().unwrap();
    assert_eq!(value, res);
}

pub fn does_not_exist<DB>(db: &DB)
where
    DB: SettingsStore,
{
    let key = "Azathoth";

    assert!(!db.exists(key).unwrap());
    assert!(db.read_obj::<i32>(key).unwrap().is_none());
    assert!(db.require_obj::<i32>(key).is_err());
    assert!(db.setting_keys().unwrap().is_empty());
}

pub fn event_sequences_are_per_sector<DB>(db: &DB)
where
    DB: SectorStore,
{
    assert_eq!(db.append_event(1, &"a".to_string()).unwrap(), 1);
    assert_eq!(db.append_event(1, &"b".to_string()).unwrap(), 2);
    assert_eq!(db.append_event(2, &"c".to_string()).unwrap(), 1);

    let pending: Vec<(u64, String)> = db.pending_events(1, 0).unwrap();
    assert_eq!(pending, vec![(1, "a".to_string()), (2, "b".to_string())]);
    let pending: Vec<(u64, String)> = db.pending_events(1, 1).unwrap();
    assert_eq!(pending, vec![(2, "b".to_string())]);
    assert_eq!(db.sector_numbers().unwrap(), vec![1, 2]);
}

pub fn commit_prunes_applied_events<DB>(db: &DB)
where
    DB: SectorStore,
{
    for event in ["a", "b", "c"] {
        db.append_event(7, &event.to_string()).unwrap();
    }
    db.commit(7, 2, &vec![1u64, 2]).unwrap();

    let pending: Vec<(u64, String)> = db.pending_events(7, 0).unwrap();
    assert_eq!(pending, vec![(3, "c".to_string())]);
    let record: Vec<u64> = db.load(7).unwrap().unwrap();
    assert_eq!(record, vec![1, 2]);

    // pruning never rewinds the sequence
    assert_eq!(db.append_event(7, &"d".to_string()).unwrap(), 4);
}

pub fn missing_record<DB>(db: &DB)
where
    DB: SectorStore,
{
    assert!(db.load::<Vec<u64>>(42).unwrap().is_none());
    assert!(db.pending_events::<String>(42, 0).unwrap().is_empty());
    assert!(db.sector_numbers().unwrap().is_empty());
}

pub fn snapshot_follows_the_cursor<DB>(db: &DB)
where
    DB: SectorStore + Sync,
{
    const ROUNDS: u64 = 100;
    assert_eq!(db.snapshot::<u64, u64>(5).unwrap(), (None, vec![]));
    std::thread::scope(|s| {
        s.spawn(|| {
            for round in 1..=ROUNDS {
                let seq = db.append_event(5, &round).unwrap();
                db.commit(5, seq, &seq).unwrap();
            }
        });
        s.spawn(|| {
            loop {
                let (record, log) = db.snapshot::<u64, u64>(5).unwrap();
                let applied = record.unwrap_or_default();
                for (expected, (seq, event)) in (applied + 1..).zip(&log) {
                    assert_eq!(*seq, expected, "log does not follow record {applied}");
                    assert_eq!(*event, expected);
                }
                if applied == ROUNDS {
                    break;
                }
            }
        });
    });
}
