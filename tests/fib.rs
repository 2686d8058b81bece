use tagrun::{Context, Outcome, StepResult};

fn run_fib(threads: usize, n: u32) -> u64 {
    let ctx = Context::with_threads(threads);
    let fib = ctx.item_collection::<u32, u64>("fib");
    let tags = ctx.tag_collection::<u32>("fib_tags");
    let steps = ctx.step_collection("fib_step", {
        let fib = fib.clone();
        move |tag: &u32| -> StepResult {
            if *tag < 2 {
                fib.put(*tag, u64::from(*tag));
            } else {
                let a = fib.get(&(tag - 1))?;
                let b = fib.get(&(tag - 2))?;
                fib.put(*tag, a + b);
            }
            Ok(Outcome::Success)
        }
    });
    steps.consumes(&fib);
    steps.produces(&fib);
    tags.prescribes(&steps);

    for t in 0..=n {
        tags.put(t);
    }
    ctx.wait();
    fib.get(&n).unwrap()
}

#[test]
fn fib_20_through_memoized_tags() {
    assert_eq!(run_fib(4, 20), 6765);
}

#[test]
fn result_is_independent_of_worker_count() {
    let single = run_fib(1, 24);
    assert_eq!(single, 46368);
    assert_eq!(run_fib(8, 24), single);
}

#[test]
fn every_intermediate_value_is_observable_after_wait() {
    let ctx = Context::new();
    let fib = ctx.item_collection::<u32, u64>("fib");
    let tags = ctx.tag_collection::<u32>("fib_tags");
    let steps = ctx.step_collection("fib_step", {
        let fib = fib.clone();
        move |tag: &u32| -> StepResult {
            if *tag < 2 {
                fib.put(*tag, u64::from(*tag));
            } else {
                let a = fib.get(&(tag - 1))?;
                let b = fib.get(&(tag - 2))?;
                fib.put(*tag, a + b);
            }
            Ok(Outcome::Success)
        }
    });
    tags.prescribes(&steps);
    // high tags first: most steps suspend before their inputs exist
    for t in (0..=15).rev() {
        tags.put(t);
    }
    ctx.wait();
    assert_eq!(fib.size(), 16);
    let mut expected = vec![0u64, 1];
    for i in 2..=15 {
        let next = expected[i - 1] + expected[i - 2];
        expected.push(next);
    }
    for (i, want) in expected.iter().enumerate() {
        assert_eq!(fib.get(&(i as u32)).unwrap(), *want);
    }
}
