use tagrun::{CancelTuner, Context, Outcome, StepResult};

// Steps cancel their successor before it is dispatched; with a wait between
// puts the outcome is deterministic: every other tag survives.
#[test]
fn steps_cancel_their_successors() {
    let ctx = Context::new();
    let items = ctx.item_collection::<i32, i32>("items");
    let tags = ctx.tag_collection::<i32>("tags");
    let tuner: CancelTuner<i32> = CancelTuner::new();
    let steps = ctx.step_collection_with_tuner(
        "cancelable",
        {
            let items = items.clone();
            let tuner = tuner.clone();
            move |tag: &i32| -> StepResult {
                tuner.cancel(tag + 1);
                items.put(*tag, *tag);
                Ok(Outcome::Success)
            }
        },
        tuner.clone(),
    );
    tags.prescribes(&steps);

    for t in 100..110 {
        tags.put(t);
        ctx.wait();
    }

    let mut present: Vec<i32> = items.iter().map(|(k, _)| k).collect();
    present.sort();
    assert_eq!(present, vec![100, 102, 104, 106, 108]);
}

#[test]
fn cancel_all_blocks_every_dispatch() {
    let ctx = Context::new();
    let items = ctx.item_collection::<i32, i32>("items");
    let tags = ctx.tag_collection::<i32>("tags");
    let tuner: CancelTuner<i32> = CancelTuner::new();
    let steps = ctx.step_collection_with_tuner(
        "cancelable",
        {
            let items = items.clone();
            move |tag: &i32| -> StepResult {
                items.put(*tag, *tag);
                Ok(Outcome::Success)
            }
        },
        tuner.clone(),
    );
    tags.prescribes(&steps);

    tuner.cancel_all();
    for t in 0..10 {
        tags.put(t);
    }
    ctx.wait();
    assert_eq!(items.size(), 0);

    // after a reset, fresh tags run again
    tuner.unsafe_reset();
    for t in 10..15 {
        tags.put(t);
    }
    ctx.wait();
    assert_eq!(items.size(), 5);
}

#[test]
fn canceled_suspended_steps_are_skipped_on_wake() {
    let ctx = Context::new();
    let items = ctx.item_collection::<i32, i32>("inputs");
    let out = ctx.item_collection::<i32, i32>("outputs");
    let tags = ctx.tag_collection::<i32>("tags");
    let tuner: CancelTuner<i32> = CancelTuner::new();
    let steps = ctx.step_collection_with_tuner(
        "forward",
        {
            let items = items.clone();
            let out = out.clone();
            move |tag: &i32| -> StepResult {
                let value = items.get(tag)?;
                out.put(*tag, value);
                Ok(Outcome::Success)
            }
        },
        tuner.clone(),
    );
    tags.prescribes(&steps);

    for t in 0..5 {
        tags.put(t);
    }
    // nothing to read yet: all five steps are now suspended
    ctx.wait();
    assert_eq!(out.size(), 0);

    tuner.cancel(2);
    tuner.cancel(3);
    for t in 0..5 {
        items.put(t, t * 10);
    }
    ctx.wait();

    let mut produced: Vec<i32> = out.iter().map(|(k, _)| k).collect();
    produced.sort();
    assert_eq!(produced, vec![0, 1, 4]);
}
