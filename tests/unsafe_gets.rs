use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tagrun::{Context, Outcome, StepResult};

// A polling consumer interleaves `unsafe_get` with `flush_gets`: each flush
// with a pending miss unwinds the attempt, and the step replays once the
// producer has put the item it was missing.
#[test]
fn polled_gets_replay_until_available() {
    let ctx = Context::new();
    let items = ctx.item_collection::<i32, i32>("items");
    let out = ctx.item_collection::<i32, i32>("out");
    let tags = ctx.tag_collection::<i32>("tags");
    let steps = ctx.step_collection("poll", {
        let items = items.clone();
        let out = out.clone();
        move |tag: &i32| -> StepResult {
            if *tag == 0 {
                for key in 0..4 {
                    thread::sleep(Duration::from_millis(20));
                    items.put(key, key * 10);
                }
            } else {
                let _ = items.unsafe_get(&0);
                tagrun::flush_gets()?;
                let _ = items.unsafe_get(&1);
                tagrun::flush_gets()?;
                let c = items.unsafe_get(&2);
                tagrun::flush_gets()?;
                let d = items.unsafe_get(&3);
                tagrun::flush_gets()?;
                out.put(*tag, c.unwrap() + d.unwrap());
            }
            Ok(Outcome::Success)
        }
    });
    tags.prescribes(&steps);

    tags.put(1);
    tags.put(0);
    ctx.wait();
    assert_eq!(out.get(&1).unwrap(), 50);
}

// An attempt that returns Success while a polled get missed is provisional:
// the runtime demotes it to a suspension and replays it when the item lands.
#[test]
fn success_with_pending_misses_is_replayed() {
    let ctx = Context::new();
    let items = ctx.item_collection::<i32, i32>("items");
    let out = ctx.item_collection::<i32, i32>("out");
    let tags = ctx.tag_collection::<i32>("tags");
    let attempts = Arc::new(AtomicU32::new(0));
    let steps = ctx.step_collection("optimist", {
        let items = items.clone();
        let out = out.clone();
        let attempts = attempts.clone();
        move |tag: &i32| -> StepResult {
            attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(value) = items.unsafe_get(&9) {
                out.put(*tag, value);
            }
            Ok(Outcome::Success)
        }
    });
    tags.prescribes(&steps);

    tags.put(1);
    ctx.wait();
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(out.size(), 0);

    items.put(9, 99);
    ctx.wait();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(out.get(&1).unwrap(), 99);
}
