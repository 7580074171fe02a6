//! End-to-end runs against the global pool.
//!
//! Every algorithm must return the same result no matter how many workers the
//! pool has, including zero. Tests in this binary share the global pool, so
//! anything that resizes it holds a lock for the duration.

use std::sync::Mutex;
use std::sync::Once;

use tutti::Policy;

static POOL_SIZE: Mutex<()> = Mutex::new(());
static TRACING: Once = Once::new();

fn with_pool_size(size: usize, test: impl FnOnce()) {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
    let _guard = POOL_SIZE.lock().unwrap();
    tutti::pool().resize_to(size);
    test();
    tutti::pool().resize_to_available();
}

fn scrambled(len: usize) -> Vec<u64> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        })
        .collect()
}

#[test]
fn reduce_is_exact_for_every_pool_size() {
    let values: Vec<u64> = (1..=1_000_000).collect();
    let expected: u64 = values.iter().sum();
    for size in [0, 1, 2, 8, 64] {
        with_pool_size(size, || {
            let total = tutti::reduce(Policy::Par, &values, 0, |a, b| a + b);
            assert_eq!(total, expected);
            let doubled =
                tutti::transform_reduce(Policy::Par, &values, 0u64, |a, b| a + b, |x| x * 2);
            assert_eq!(doubled, expected * 2);
        });
    }
}

#[test]
fn sorts_agree_with_the_standard_library_for_every_pool_size() {
    let input = scrambled(300_000);
    let mut expected = input.clone();
    expected.sort_unstable();
    for size in [0, 1, 3, 16] {
        with_pool_size(size, || {
            let mut v = input.clone();
            tutti::sort(Policy::Par, &mut v);
            assert_eq!(v, expected);
            let mut v = input.clone();
            tutti::stable_sort(Policy::Par, &mut v);
            assert_eq!(v, expected);
        });
    }
}

#[test]
fn stable_sort_keeps_equal_keys_in_input_order() {
    let mut v: Vec<(u16, usize)> = scrambled(200_000)
        .into_iter()
        .enumerate()
        .map(|(index, key)| ((key % 100) as u16, index))
        .collect();
    with_pool_size(8, || {
        tutti::stable_sort_by(Policy::Par, &mut v, |a, b| a.0.cmp(&b.0));
    });
    for pair in v.windows(2) {
        assert!(pair[0].0 <= pair[1].0);
        if pair[0].0 == pair[1].0 {
            assert!(pair[0].1 < pair[1].1, "equal keys reordered");
        }
    }
}

#[test]
fn scans_compose_left_to_right() {
    let input = [1u64, 2, 3, 4, 5];
    with_pool_size(4, || {
        let mut out = [0u64; 5];
        tutti::exclusive_scan(Policy::Par, &input, &mut out, 100, |a, b| a + b);
        assert_eq!(out, [100, 101, 103, 106, 110]);
        tutti::inclusive_scan(Policy::Par, &input, &mut out, 100, |a, b| a + b);
        assert_eq!(out, [101, 103, 106, 110, 115]);

        let big: Vec<u64> = (1..=500_000).collect();
        let mut expected = vec![0u64; big.len()];
        tutti::inclusive_scan(Policy::Seq, &big, &mut expected, 0, |a, b| a + b);
        let mut got = vec![0u64; big.len()];
        tutti::inclusive_scan(Policy::Par, &big, &mut got, 0, |a, b| a + b);
        assert_eq!(got, expected);
    });
}

/// With zero workers every parallel request must quietly run sequentially
/// and still produce the right answer.
#[test]
fn empty_pool_runs_every_algorithm_sequentially() {
    with_pool_size(0, || {
        let policy = Policy::Par;

        let mut v: Vec<u32> = (0..10_000).collect();
        tutti::for_each(policy, &mut v, |x| *x += 1);
        assert_eq!(v[0], 1);
        let total = std::sync::atomic::AtomicU64::new(0);
        tutti::for_each_iter(policy, 1..=100u64, |x| {
            total.fetch_add(x, std::sync::atomic::Ordering::Relaxed);
        });
        assert_eq!(total.into_inner(), 5050);
        let mut doubled = vec![0u32; v.len()];
        tutti::transform(policy, &v, &mut doubled, |x| x * 2);
        assert_eq!(doubled[10], v[10] * 2);

        assert_eq!(tutti::find(policy, &v, &500), Some(499));
        assert_eq!(tutti::find_if(policy, &v, |x| *x > 9_000), Some(9_000));
        assert_eq!(tutti::find_if_not(policy, &v, |x| *x < 100), Some(99));
        assert_eq!(tutti::find_first_of(policy, &v, &[77, 33]), Some(32));
        assert_eq!(tutti::search(policy, &v, &[5, 6, 7]), Some(4));
        assert_eq!(tutti::find_end(policy, &v, &[5, 6, 7]), Some(4));
        assert_eq!(tutti::search_n(policy, &v, 1, &42), Some(41));
        assert_eq!(tutti::adjacent_find(policy, &v, |a, b| a > b), None);
        assert_eq!(tutti::mismatch(policy, &v, &doubled), 0);
        assert!(tutti::equal(policy, &v, &v.clone()));

        assert_eq!(tutti::count(policy, &v, &9), 1);
        assert_eq!(tutti::count_if(policy, &v, |x| x % 2 == 0), 5_000);
        assert_eq!(tutti::reduce(policy, &v, 0u32, |a, b| a + b), v.iter().sum());
        let dot = tutti::transform_reduce_zip(
            policy,
            &v,
            &doubled,
            0u64,
            |a, b| a + b,
            |a, b| u64::from(*a) * u64::from(*b),
        );
        assert!(dot > 0);

        let mut out = vec![0u32; v.len()];
        tutti::adjacent_difference(policy, &v, &mut out, |a, b| a - b);
        assert_eq!(out[0], 1);
        assert!(out[1..].iter().all(|x| *x == 1));
        let mut mapped = vec![0u64; v.len()];
        tutti::transform_exclusive_scan(policy, &v, &mut mapped, 0, |a, b| a + b, |x| {
            u64::from(*x)
        });
        assert_eq!(mapped[1], 1);
        tutti::transform_inclusive_scan(policy, &v, &mut mapped, 0, |a, b| a + b, |x| {
            u64::from(*x)
        });
        assert_eq!(mapped[1], 3);

        let mut p: Vec<u32> = (0..10_000).collect();
        let boundary = tutti::partition(policy, &mut p, |x| x % 2 == 0);
        assert_eq!(boundary, 5_000);
        assert!(tutti::is_partitioned(policy, &p, |x| x % 2 == 0));
        let kept = tutti::remove_if(policy, &mut p, |x| x % 2 == 0);
        assert_eq!(kept, 5_000);
        let mut r = vec![1u32, 2, 1, 3];
        assert_eq!(tutti::remove(policy, &mut r, &1), 2);

        let a = [1, 2, 2, 3, 5];
        let b = [2, 3, 4];
        let mut set_out = [0; 5];
        let written = tutti::set_difference(policy, &a, &b, &mut set_out);
        assert_eq!(&set_out[..written], &[1, 2, 5]);
        let written = tutti::set_intersection(policy, &a, &b, &mut set_out);
        assert_eq!(&set_out[..written], &[2, 3]);

        let mut s = scrambled(50_000);
        tutti::sort(policy, &mut s);
        assert_eq!(tutti::is_sorted_until(policy, &s, |a, b| a < b), s.len());
        let heap: Vec<u64> = (0..1_000).rev().collect();
        assert_eq!(tutti::is_heap_until(policy, &heap, |a, b| a < b), 1_000);
        let mut s2 = scrambled(50_000);
        tutti::sort_by(policy, &mut s2, |a, b| b.cmp(a));
        assert_eq!(tutti::is_sorted_until(policy, &s2, |a, b| a > b), s2.len());
    });
}

#[test]
fn partition_and_removal_hold_under_contention() {
    with_pool_size(8, || {
        let mut v = scrambled(400_000);
        let pred = |x: &u64| x % 3 == 0;
        let expected = v.iter().filter(|x| pred(x)).count();
        let boundary = tutti::partition(Policy::Par, &mut v, pred);
        assert_eq!(boundary, expected);
        assert!(tutti::is_partitioned(Policy::Par, &v, pred));

        let mut v = scrambled(400_000);
        let expected: Vec<u64> = v.iter().copied().filter(|x| !pred(x)).collect();
        let kept = tutti::remove_if(Policy::Par, &mut v, pred);
        assert_eq!(&v[..kept], &expected[..]);
    });
}

#[test]
fn searches_report_positional_winners_under_contention() {
    with_pool_size(8, || {
        let mut v = vec![0u8; 1_000_000];
        v[333_333] = 1;
        v[777_777] = 1;
        assert_eq!(tutti::find(Policy::Par, &v, &1), Some(333_333));
        assert_eq!(tutti::find_end(Policy::Par, &v, &[1]), Some(777_777));
        assert_eq!(tutti::count(Policy::Par, &v, &1), 2);

        let a = scrambled(1_000_000);
        let mut b = a.clone();
        assert!(tutti::equal(Policy::Par, &a, &b));
        b[912_345] ^= 1;
        assert!(!tutti::equal(Policy::Par, &a, &b));
        assert_eq!(tutti::mismatch(Policy::Par, &a, &b), 912_345);
    });
}

#[test]
fn set_operations_match_their_serial_walks() {
    with_pool_size(8, || {
        let mut a = scrambled(200_000);
        a.iter_mut().for_each(|x| *x %= 10_000);
        a.sort_unstable();
        let mut b = scrambled(120_000);
        b.iter_mut().for_each(|x| *x %= 10_000);
        b.sort_unstable();

        let mut expected = vec![0u64; a.len()];
        let expected_len = tutti::set_difference(Policy::Seq, &a, &b, &mut expected);
        let mut got = vec![0u64; a.len()];
        let got_len = tutti::set_difference(Policy::Par, &a, &b, &mut got);
        assert_eq!(got[..got_len], expected[..expected_len]);

        let mut expected = vec![0u64; b.len()];
        let expected_len = tutti::set_intersection(Policy::Seq, &a, &b, &mut expected);
        let mut got = vec![0u64; b.len()];
        let got_len = tutti::set_intersection(Policy::Par, &a, &b, &mut got);
        assert_eq!(got[..got_len], expected[..expected_len]);
    });
}
