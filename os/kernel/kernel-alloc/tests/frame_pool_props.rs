//! Property tests for frame pool bookkeeping.

use kernel_alloc::frame_pool::{FramePool, FramePoolError, FrameState};
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::sim::SimulatedMachine;
use proptest::prelude::*;

const BASE: u32 = 64;
const COUNT: u32 = 128;

#[derive(Clone, Debug)]
enum Op {
    Get(u32),
    /// Release the live run at this index (modulo the number of runs).
    Release(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u32..24).prop_map(Op::Get),
        2 => any::<usize>().prop_map(Op::Release),
    ]
}

fn pool(machine: &SimulatedMachine, self_hosted: bool) -> FramePool {
    let info = (!self_hosted).then(|| FrameNumber::new(1));
    unsafe { FramePool::new(machine, FrameNumber::new(BASE), COUNT, info) }.unwrap()
}

fn free_in_bitmap(pool: &FramePool) -> u32 {
    let free = pool.states().filter(|s| *s == FrameState::Free).count();
    u32::try_from(free).unwrap()
}

fn check_runs(pool: &FramePool, runs: &[(FrameNumber, u32)]) -> Result<(), TestCaseError> {
    let mut owner = vec![None; COUNT as usize];
    for (i, &(first, n)) in runs.iter().enumerate() {
        prop_assert_eq!(pool.state(first), Some(FrameState::HeadOfSequence));
        for k in 0..n {
            let frame = first + k;
            if k > 0 {
                prop_assert_eq!(pool.state(frame), Some(FrameState::Allocated));
            }
            let slot = &mut owner[(frame - pool.base()) as usize];
            prop_assert!(slot.is_none(), "frame {} handed out twice", frame);
            *slot = Some(i);
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn free_counter_matches_bitmap(self_hosted in any::<bool>(), ops in prop::collection::vec(arb_op(), 1..64)) {
        let machine = SimulatedMachine::new(256);
        let mut pool = pool(&machine, self_hosted);
        let mut runs: Vec<(FrameNumber, u32)> = Vec::new();

        for op in ops {
            match op {
                Op::Get(n) => {
                    let free = pool.free_frames();
                    match pool.get_frames(n) {
                        Ok(first) => {
                            prop_assert_eq!(pool.free_frames(), free - n);
                            runs.push((first, n));
                        }
                        Err(_) => prop_assert_eq!(pool.free_frames(), free),
                    }
                }
                Op::Release(i) if !runs.is_empty() => {
                    let (first, n) = runs.remove(i % runs.len());
                    prop_assert_eq!(pool.release_run(first), Ok(n));
                }
                Op::Release(_) => {}
            }
            prop_assert_eq!(pool.free_frames(), free_in_bitmap(&pool));
            check_runs(&pool, &runs)?;
        }
    }

    #[test]
    fn releasing_everything_restores_the_pool(self_hosted in any::<bool>(), sizes in prop::collection::vec(1u32..16, 1..12)) {
        let machine = SimulatedMachine::new(256);
        let mut pool = pool(&machine, self_hosted);
        let initial: Vec<FrameState> = pool.states().collect();
        let initial_free = pool.free_frames();

        let runs: Vec<FrameNumber> = sizes
            .iter()
            .filter_map(|&n| pool.get_frames(n).ok())
            .collect();
        for first in runs.into_iter().rev() {
            pool.release_run(first).unwrap();
        }

        prop_assert_eq!(pool.free_frames(), initial_free);
        prop_assert_eq!(pool.states().collect::<Vec<_>>(), initial);
    }

    #[test]
    fn oversized_requests_change_nothing(self_hosted in any::<bool>(), taken in 0u32..64, extra in 1u32..64) {
        let machine = SimulatedMachine::new(256);
        let mut pool = pool(&machine, self_hosted);
        if taken > 0 {
            pool.get_frames(taken).unwrap();
        }
        let before: Vec<FrameState> = pool.states().collect();
        let free = pool.free_frames();

        prop_assert_eq!(
            pool.get_frames(free + extra),
            Err(FramePoolError::InsufficientFrames { requested: free + extra, free })
        );
        prop_assert_eq!(pool.get_frames(0), Err(FramePoolError::ZeroFrames));
        prop_assert_eq!(pool.free_frames(), free);
        prop_assert_eq!(pool.states().collect::<Vec<_>>(), before);
    }

    #[test]
    fn only_run_heads_can_be_released(n in 2u32..16, offset in 1u32..16) {
        prop_assume!(offset < n);
        let machine = SimulatedMachine::new(256);
        let mut pool = pool(&machine, true);
        let first = pool.get_frames(n).unwrap();
        let inner = first + offset;

        prop_assert_eq!(pool.release_run(inner), Err(FramePoolError::NotHeadOfSequence(inner)));
        prop_assert_eq!(pool.release_run(first), Ok(n));
        prop_assert_eq!(pool.release_run(first), Err(FramePoolError::NotHeadOfSequence(first)));
    }
}
