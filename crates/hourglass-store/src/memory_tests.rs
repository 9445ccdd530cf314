use super::*;
use crate::clock::ManualClock;
use crate::store::StoreExt;

fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    (MemoryStore::with_clock(clock.clone()), clock)
}

fn s(items: &[&str]) -> Vec<String> {
    items.iter().map(|i| i.to_string()).collect()
}

/// Moves every member of `src` scored at or below `args[0]` onto the head of
/// list `dst`.
struct MoveDue;

impl Script for MoveDue {
    fn name(&self) -> &'static str {
        "move_due"
    }

    fn run(&self, cmd: &mut dyn Commands, keys: &[String], args: &[i64]) -> StoreResult<Reply> {
        let due = cmd.zrange_by_score(&keys[0], 0, args[0])?;
        if due.is_empty() {
            return Ok(Reply::Int(0));
        }
        cmd.lpush(&keys[1], &due)?;
        cmd.zrem_range_by_score(&keys[0], 0, args[0])?;
        Ok(Reply::Int(due.len() as i64))
    }
}

#[tokio::test]
async fn test_set_ex_expires() {
    let (store, clock) = store_with_clock();
    store
        .set_ex("msg:1", "hello", Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(store.get("msg:1").await.unwrap().as_deref(), Some("hello"));

    clock.advance(Duration::from_secs(9));
    assert!(store.get("msg:1").await.unwrap().is_some());

    clock.advance(Duration::from_secs(1));
    assert!(store.get("msg:1").await.unwrap().is_none());
    assert_eq!(store.key_count(), 0);
}

#[tokio::test]
async fn test_rewrite_extends_expiry() {
    let (store, clock) = store_with_clock();
    store.set_ex("k", "a", Duration::from_secs(5)).await.unwrap();
    store.set_ex("k", "b", Duration::from_secs(60)).await.unwrap();

    clock.advance(Duration::from_secs(10));
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
}

#[tokio::test]
async fn test_zero_ttl_expires_immediately() {
    let (store, _clock) = store_with_clock();
    store.set_ex("k", "v", Duration::ZERO).await.unwrap();
    assert!(store.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn test_sorted_set_range_is_inclusive_and_ordered() {
    let store = MemoryStore::new();
    store
        .execute(Command::ZAdd {
            key: "z".into(),
            members: vec![("c".into(), 30), ("a".into(), 10), ("b".into(), 20)],
        })
        .await
        .unwrap();

    let reply = store
        .execute(Command::ZRangeByScore {
            key: "z".into(),
            min: 10,
            max: 20,
        })
        .await
        .unwrap();
    assert_eq!(reply.into_strings().unwrap(), s(&["a", "b"]));

    // Re-scoring does not add a member.
    assert_eq!(store.zadd("z", "a", 40).await.unwrap(), 0);
    assert_eq!(store.zcard("z").await.unwrap(), 3);
    assert_eq!(store.zscore("z", "a").await.unwrap(), Some(40));
}

#[tokio::test]
async fn test_zrem_range_removes_only_in_range() {
    let store = MemoryStore::new();
    for (member, score) in [("a", 1), ("b", 2), ("c", 3)] {
        store.zadd("z", member, score).await.unwrap();
    }
    let removed = store
        .execute(Command::ZRemRangeByScore {
            key: "z".into(),
            min: 0,
            max: 2,
        })
        .await
        .unwrap();
    assert_eq!(removed, Reply::Int(2));
    assert_eq!(store.zscore("z", "c").await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_list_is_fifo_through_lpush_rpop() {
    let store = MemoryStore::new();
    store
        .execute(Command::LPush {
            key: "l".into(),
            values: s(&["1", "2", "3"]),
        })
        .await
        .unwrap();
    assert_eq!(store.llen("l").await.unwrap(), 3);

    let mut popped = Vec::new();
    while let Some(v) = store
        .execute(Command::RPop { key: "l".into() })
        .await
        .unwrap()
        .into_opt_string()
        .unwrap()
    {
        popped.push(v);
    }
    assert_eq!(popped, s(&["1", "2", "3"]));
    assert_eq!(store.key_count(), 0);
}

#[tokio::test]
async fn test_hash_incr_and_delete() {
    let store = MemoryStore::new();
    store.hset("h", "id", "3").await.unwrap();
    let reply = store
        .execute(Command::HIncrBy {
            key: "h".into(),
            field: "id".into(),
            delta: -1,
        })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Int(2));

    let values = store.hmget("h", &s(&["id", "missing"])).await.unwrap();
    assert_eq!(values, vec![Some("2".to_string()), None]);

    assert_eq!(store.hdel("h", &s(&["id"])).await.unwrap(), 1);
    assert_eq!(store.hlen("h").await.unwrap(), 0);
    assert_eq!(store.key_count(), 0);
}

#[tokio::test]
async fn test_hincr_rejects_non_integer() {
    let store = MemoryStore::new();
    store.hset("h", "id", "many").await.unwrap();
    let result = store
        .execute(Command::HIncrBy {
            key: "h".into(),
            field: "id".into(),
            delta: 1,
        })
        .await;
    assert!(matches!(result, Err(StoreError::InvalidValue { .. })));
}

#[tokio::test]
async fn test_wrong_type_is_rejected() {
    let store = MemoryStore::new();
    store.zadd("k", "a", 1).await.unwrap();
    let result = store
        .execute(Command::LPush {
            key: "k".into(),
            values: s(&["x"]),
        })
        .await;
    assert!(matches!(result, Err(StoreError::WrongType(_))));
    // Reads against a missing key of another type are fine.
    assert_eq!(store.llen("missing").await.unwrap(), 0);
}

#[tokio::test]
async fn test_set_members_and_removal() {
    let store = MemoryStore::new();
    store
        .execute(Command::SAdd {
            key: "g".into(),
            members: s(&["b", "a", "b"]),
        })
        .await
        .unwrap();
    assert_eq!(store.scard("g").await.unwrap(), 2);
    assert_eq!(store.smembers("g").await.unwrap(), s(&["a", "b"]));
    assert_eq!(store.srem("g", &s(&["a", "z"])).await.unwrap(), 1);
}

#[tokio::test]
async fn test_del_counts_existing_keys() {
    let store = MemoryStore::new();
    store.set_ex("a", "1", Duration::from_secs(60)).await.unwrap();
    store.zadd("b", "m", 1).await.unwrap();
    assert_eq!(store.del(&s(&["a", "b", "c"])).await.unwrap(), 2);
}

#[tokio::test]
async fn test_script_runs_atomically() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..100 {
        store.zadd("src", &i.to_string(), i).await.unwrap();
    }

    let script: Arc<dyn Script> = Arc::new(MoveDue);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let script = script.clone();
        handles.push(tokio::spawn(async move {
            store
                .eval(script, vec!["src".into(), "dst".into()], vec![49])
                .await
                .unwrap()
        }));
    }

    let mut moved = 0;
    for handle in handles {
        if let Reply::Int(n) = handle.await.unwrap() {
            moved += n;
        }
    }
    // Only one invocation sees the due members.
    assert_eq!(moved, 50);
    assert_eq!(store.llen("dst").await.unwrap(), 50);
    assert_eq!(store.zcard("src").await.unwrap(), 50);
}

#[tokio::test]
async fn test_publish_subscribe() {
    let store = MemoryStore::new();
    let mut sub = store.subscribe("events").await.unwrap();
    assert_eq!(store.publish("events", "ping").await.unwrap(), 1);
    assert_eq!(sub.recv().await.as_deref(), Some("ping"));
}
