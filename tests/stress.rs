use rand::seq::SliceRandom;
use rand::Rng;
use std::thread;
use tagrun::{Context, Outcome, StepResult};

// Wavefront width and depth.
const W: u32 = 16;
const R: u32 = 24;

fn expected_grid() -> Vec<Vec<u64>> {
    let mut grid = vec![vec![0u64; W as usize]; R as usize];
    for k in 0..W {
        grid[0][k as usize] = u64::from(k + 1);
    }
    for r in 1..R {
        for k in 0..W {
            grid[r as usize][k as usize] = grid[(r - 1) as usize][k as usize]
                + grid[(r - 1) as usize][((k + 1) % W) as usize];
        }
    }
    grid
}

// Step (r, k) reads two items of the previous round and publishes its own.
// Tags arrive shuffled from several environment threads, so most steps
// suspend at least once; the final round must still be exact.
fn run_wavefront(threads: usize, rng: &mut impl Rng) {
    let ctx = Context::with_threads(threads);
    let items = ctx.item_collection::<(u32, u32), u64>("wave");
    let tags = ctx.tag_collection::<(u32, u32)>("fronts");
    let steps = ctx.step_collection("advance", {
        let items = items.clone();
        move |tag: &(u32, u32)| -> StepResult {
            let (r, k) = *tag;
            let a = items.get(&(r - 1, k))?;
            let b = items.get(&(r - 1, (k + 1) % W))?;
            items.put((r, k), a + b);
            Ok(Outcome::Success)
        }
    });
    steps.consumes(&items);
    steps.produces(&items);
    tags.prescribes(&steps);

    for k in 0..W {
        items.put((0, k), u64::from(k + 1));
    }

    let mut all_tags: Vec<(u32, u32)> = (1..R)
        .flat_map(|r| (0..W).map(move |k| (r, k)))
        .collect();
    all_tags.shuffle(rng);

    let putters: Vec<_> = all_tags
        .chunks((all_tags.len() + 3) / 4)
        .map(|chunk| {
            let tags = tags.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for tag in chunk {
                    tags.put(tag);
                }
            })
        })
        .collect();
    for putter in putters {
        putter.join().unwrap();
    }
    ctx.wait();

    let grid = expected_grid();
    assert_eq!(items.size(), (W * R) as usize);
    for k in 0..W {
        assert_eq!(
            items.get(&(R - 1, k)).unwrap(),
            grid[(R - 1) as usize][k as usize],
            "column {} diverged with {} workers",
            k,
            threads
        );
    }
}

#[test]
fn shuffled_wavefront_is_exact_at_any_pool_size() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = rand::thread_rng();
    for _ in 0..3 {
        let threads = rng.gen_range(1..=8);
        run_wavefront(threads, &mut rng);
    }
}

// Duplicate tags from competing environment threads must collapse to one
// step execution each.
#[test]
fn concurrent_duplicate_puts_run_each_step_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = Context::new();
    let items = ctx.item_collection::<u32, u32>("once");
    let tags = ctx.tag_collection::<u32>("dups");
    let steps = ctx.step_collection("emit", {
        let items = items.clone();
        move |tag: &u32| -> StepResult {
            // a duplicate execution would be a double put
            items.put(*tag, *tag);
            Ok(Outcome::Success)
        }
    });
    tags.prescribes(&steps);

    let putters: Vec<_> = (0..4)
        .map(|_| {
            let tags = tags.clone();
            thread::spawn(move || {
                for t in 0..500 {
                    tags.put(t);
                }
            })
        })
        .collect();
    for putter in putters {
        putter.join().unwrap();
    }
    ctx.wait();
    assert_eq!(items.size(), 500);
    assert_eq!(tags.size(), 500);
}
