use tagrun::Context;

#[test]
#[should_panic(expected = "single-assignment violation")]
fn double_put_from_the_environment_is_fatal() {
    let ctx = Context::with_threads(1);
    let items = ctx.item_collection::<i32, i32>("items");
    items.put(3, 30);
    items.put(3, 31);
}

#[test]
#[should_panic(expected = "unsafe_reset while the graph is active")]
fn reset_of_an_active_graph_is_fatal() {
    let ctx = Context::with_threads(1);
    ctx.leave_quiescence();
    ctx.unsafe_reset();
}

#[test]
fn reset_in_quiescence_keeps_the_wiring() {
    use tagrun::{Outcome, StepResult};

    let ctx = Context::new();
    let items = ctx.item_collection::<i32, i32>("items");
    let tags = ctx.tag_collection::<i32>("tags");
    let steps = ctx.step_collection("emit", {
        let items = items.clone();
        move |tag: &i32| -> StepResult {
            items.put(*tag, tag * 3);
            Ok(Outcome::Success)
        }
    });
    tags.prescribes(&steps);

    for t in 0..4 {
        tags.put(t);
    }
    ctx.wait();
    assert_eq!(items.size(), 4);

    ctx.unsafe_reset();
    assert_eq!(items.size(), 0);
    assert_eq!(tags.size(), 0);

    // the graph is still wired: the same tags run again after the reset
    for t in 0..4 {
        tags.put(t);
    }
    ctx.wait();
    assert_eq!(items.size(), 4);
    assert_eq!(items.get(&2).unwrap(), 6);
}
