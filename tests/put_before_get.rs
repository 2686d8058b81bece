use tagrun::{Context, Outcome, StepResult};

// Each step publishes the item its successor waits for *before* doing its
// own get, so the chain makes progress regardless of scheduling order, and
// replayed steps re-issue puts they already performed.
#[test]
fn chained_puts_before_gets_complete() {
    let ctx = Context::new();
    let items = ctx.item_collection::<i32, i32>("chain");
    let tags = ctx.tag_collection::<i32>("links");
    let steps = ctx.step_collection("link", {
        let items = items.clone();
        move |tag: &i32| -> StepResult {
            items.put(tag + 1, *tag);
            let _ = items.get(tag)?;
            Ok(Outcome::Success)
        }
    });
    steps.consumes(&items);
    steps.produces(&items);
    tags.prescribes(&steps);

    items.put(0, 0);
    for t in 0..1000 {
        tags.put(t);
    }
    ctx.wait();

    assert_eq!(items.size(), 1001);
    for t in 1..=1000 {
        assert_eq!(items.get(&t).unwrap(), t - 1);
    }
}

#[test]
fn chain_completes_with_a_single_worker() {
    let ctx = Context::with_threads(1);
    let items = ctx.item_collection::<i32, i32>("chain");
    let tags = ctx.tag_collection::<i32>("links");
    let steps = ctx.step_collection("link", {
        let items = items.clone();
        move |tag: &i32| -> StepResult {
            items.put(tag + 1, *tag);
            let _ = items.get(tag)?;
            Ok(Outcome::Success)
        }
    });
    tags.prescribes(&steps);

    items.put(0, 0);
    // reverse order maximizes suspensions
    for t in (0..100).rev() {
        tags.put(t);
    }
    ctx.wait();
    assert_eq!(items.size(), 101);
}
