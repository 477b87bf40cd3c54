use fabric::{Fabric, SendHandle};

/// Drives a sliding window of `w` concurrently-outstanding workers from
/// rank 0, issuing a start signal and awaiting a completion reply from
/// each non-zero rank in turn, then all-reduces the logical AND of
/// every rank's individual success into the global outcome.
///
/// `local_fetch` is rank 0's own fetch step; it is run serially before
/// any signal is issued to other ranks, since rank 0 owns the file map
/// mutations for its own rank.
///
/// Every rank must call this once per attempt: rank 0 runs the window
/// below, every other rank runs the "blocking receive / maybe fetch /
/// blocking reply" branch, and all ranks converge on the same
/// `all_reduce_and` call at the end.
pub fn run_flow_controller<F, Fetch>(fabric: &F, width: usize, mut local_fetch: Fetch) -> bool
where
    F: Fabric,
    Fetch: FnMut(usize) -> bool,
{
    let rank = fabric.rank();
    let world_size = fabric.world_size();

    let my_success = if rank == 0 {
        run_coordinator(fabric, width, world_size, &mut local_fetch)
    } else {
        run_worker(fabric, &mut local_fetch)
    };

    fabric.all_reduce_and(my_success)
}

fn run_coordinator<F, Fetch>(fabric: &F, width: usize, world_size: usize, local_fetch: &mut Fetch) -> bool
where
    F: Fabric,
    Fetch: FnMut(usize) -> bool,
{
    let mut aggregate = local_fetch(0);

    if world_size <= 1 {
        return aggregate;
    }

    let width = width.clamp(1, world_size - 1);
    let mut next_rank = 1usize;

    // Parallel to one another: `recvs[i]` is the completion reply from
    // `ranks[i]`, whose start signal is `sends[i]`. `wait_any_recv`
    // removes by index from `recvs` alone, so the other two vectors are
    // kept in lockstep by removing the same index right after.
    let mut ranks: Vec<usize> = Vec::new();
    let mut sends: Vec<F::Send> = Vec::new();
    let mut recvs: Vec<F::Recv> = Vec::new();

    let issue = |fabric: &F, rank: usize, aggregate: bool, ranks: &mut Vec<usize>, sends: &mut Vec<F::Send>, recvs: &mut Vec<F::Recv>| {
        recvs.push(fabric.irecv(rank, 0));
        sends.push(fabric.isend(rank, 0, vec![aggregate as u8]));
        ranks.push(rank);
    };

    while next_rank < world_size && ranks.len() < width {
        issue(fabric, next_rank, aggregate, &mut ranks, &mut sends, &mut recvs);
        next_rank += 1;
    }

    while !ranks.is_empty() {
        let (index, payload) = F::wait_any_recv(&mut recvs);
        ranks.remove(index);
        let send = sends.remove(index);
        send.wait().expect("flow controller send must not fail");
        aggregate = aggregate && payload.first() == Some(&1);

        if next_rank < world_size {
            issue(fabric, next_rank, aggregate, &mut ranks, &mut sends, &mut recvs);
            next_rank += 1;
        }
    }

    aggregate
}

fn run_worker<Fetch>(fabric: &impl Fabric, local_fetch: &mut Fetch) -> bool
where
    Fetch: FnMut(usize) -> bool,
{
    let rank = fabric.rank();
    let start = fabric.recv(0, 0).expect("flow controller recv must not fail");
    let aggregate_so_far = start.first() == Some(&1);

    let my_success = if aggregate_so_far { local_fetch(rank) } else { false };

    fabric
        .send(0, 0, vec![my_success as u8])
        .expect("flow controller reply send must not fail");

    my_success
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric::ThreadFabric;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn every_rank_succeeding_yields_global_success() {
        let outcomes = ThreadFabric::run_world(4, |fabric| run_flow_controller(&fabric, 2, |_rank| true));
        assert!(outcomes.iter().all(|&ok| ok));
    }

    #[test]
    fn one_rank_failing_poisons_the_global_outcome_on_every_rank() {
        let outcomes = ThreadFabric::run_world(4, |fabric| run_flow_controller(&fabric, 2, |r| r != 2));
        assert!(outcomes.iter().all(|&ok| !ok));
    }

    #[test]
    fn window_never_exceeds_configured_width() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let outcomes = ThreadFabric::run_world(5, {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move |fabric| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                run_flow_controller(&fabric, 2, move |_rank| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    active.fetch_sub(1, Ordering::SeqCst);
                    true
                })
            }
        });
        assert!(outcomes.iter().all(|&ok| ok));
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[test]
    fn single_rank_world_skips_the_window_entirely() {
        let outcomes = ThreadFabric::run_world(1, |fabric| run_flow_controller(&fabric, 4, |_rank| true));
        assert_eq!(outcomes, vec![true]);
    }
}
