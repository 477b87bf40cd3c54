use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};

use crossbeam_channel::{Receiver, Select, Sender, unbounded};

use crate::{Fabric, FabricError, RecvHandle, SendHandle};

/// Shared state every rank's [`ThreadFabric`] handle points into.
///
/// Collective calls follow a publish / barrier / read / barrier pattern:
/// a designated rank (or every rank, for the reduce and exchange) writes
/// into `scratch` before `phase1`, every rank reads after `phase1`, and
/// `phase2` holds all ranks until every read has completed so the next
/// collective call cannot reuse `scratch` before this one is done with
/// it. This relies on every rank calling collectives in the same order,
/// which is the fabric's documented contract.
struct World {
    size: usize,
    phase1: Barrier,
    phase2: Barrier,
    broadcast_scratch: Mutex<Vec<u8>>,
    reduce_votes: Mutex<Vec<bool>>,
    exchange_scratch: Mutex<HashMap<usize, HashMap<usize, Vec<u8>>>>,
    // p2p_tx[src][dst] / p2p_rx[src][dst]: one dedicated unbounded channel
    // per ordered pair, so posting a send never blocks and messages from
    // distinct senders never interleave.
    p2p_tx: Vec<Vec<Sender<Vec<u8>>>>,
    p2p_rx: Vec<Vec<Receiver<Vec<u8>>>>,
}

impl World {
    fn new(size: usize) -> Arc<Self> {
        let mut tx = Vec::with_capacity(size);
        let mut rx = Vec::with_capacity(size);
        for _ in 0..size {
            let mut tx_row = Vec::with_capacity(size);
            let mut rx_row = Vec::with_capacity(size);
            for _ in 0..size {
                let (s, r) = unbounded();
                tx_row.push(s);
                rx_row.push(r);
            }
            tx.push(tx_row);
            rx.push(rx_row);
        }
        Arc::new(World {
            size,
            phase1: Barrier::new(size),
            phase2: Barrier::new(size),
            broadcast_scratch: Mutex::new(Vec::new()),
            reduce_votes: Mutex::new(vec![true; size]),
            exchange_scratch: Mutex::new(HashMap::new()),
            p2p_tx: tx,
            p2p_rx: rx,
        })
    }
}

/// A completion handle for [`ThreadFabric::isend`].
///
/// Sends are delivered to an unbounded per-pair channel, so "posting" a
/// send is already complete by the time this handle exists; `wait` is a
/// no-op kept for symmetry with [`RecvHandle`].
pub struct ThreadSend;

impl SendHandle for ThreadSend {
    fn wait(self) -> Result<(), FabricError> {
        Ok(())
    }
}

/// A completion handle for [`ThreadFabric::irecv`].
pub struct ThreadRecv {
    rx: Receiver<Vec<u8>>,
    src: usize,
}

impl RecvHandle for ThreadRecv {
    fn wait(self) -> Result<Vec<u8>, FabricError> {
        self.rx.recv().map_err(|_| FabricError::PeerGone { rank: self.src })
    }
}

/// An in-process [`Fabric`] backend that simulates a world of ranks as
/// scoped threads sharing channels.
///
/// Build a world with [`ThreadFabric::run_world`], which spawns one
/// thread per rank, hands each thread its own `ThreadFabric`, and joins
/// them all, propagating the first panic (mirroring how a job scheduler
/// tears down the whole job when one rank dies).
#[derive(Clone)]
pub struct ThreadFabric {
    rank: usize,
    world: Arc<World>,
}

impl ThreadFabric {
    /// Spawns `world_size` scoped threads, each running `body` with its
    /// own rank's [`ThreadFabric`], and waits for all of them to finish.
    ///
    /// # Panics
    ///
    /// Re-panics with the first captured panic if any rank's `body`
    /// panics, after every other rank has finished or panicked too.
    pub fn run_world<T, Body>(world_size: usize, body: Body) -> Vec<T>
    where
        T: Send,
        Body: Fn(ThreadFabric) -> T + Sync,
    {
        assert!(world_size > 0, "world_size must be positive");
        let world = World::new(world_size);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..world_size)
                .map(|rank| {
                    let fabric = ThreadFabric {
                        rank,
                        world: Arc::clone(&world),
                    };
                    let body = &body;
                    scope.spawn(move || body(fabric))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}

impl Fabric for ThreadFabric {
    type Send = ThreadSend;
    type Recv = ThreadRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world.size
    }

    fn barrier(&self) {
        self.world.phase1.wait();
        self.world.phase2.wait();
    }

    fn broadcast_bytes(&self, root: usize, buf: &mut Vec<u8>) {
        if self.rank == root {
            *self.world.broadcast_scratch.lock().unwrap() = buf.clone();
        }
        self.world.phase1.wait();
        if self.rank != root {
            *buf = self.world.broadcast_scratch.lock().unwrap().clone();
        }
        self.world.phase2.wait();
    }

    fn all_reduce_and(&self, value: bool) -> bool {
        self.world.reduce_votes.lock().unwrap()[self.rank] = value;
        self.world.phase1.wait();
        let result = self.world.reduce_votes.lock().unwrap().iter().all(|v| *v);
        self.world.phase2.wait();
        result
    }

    fn exchange_bytes(&self, outgoing: HashMap<usize, Vec<u8>>) -> HashMap<usize, Vec<u8>> {
        {
            let mut inbox = self.world.exchange_scratch.lock().unwrap();
            for (dest, payload) in outgoing {
                inbox.entry(dest).or_default().insert(self.rank, payload);
            }
        }
        self.world.phase1.wait();
        let mine = self
            .world
            .exchange_scratch
            .lock()
            .unwrap()
            .get(&self.rank)
            .cloned()
            .unwrap_or_default();
        // Remove our own inbox entry so the scratch map is empty again
        // before the next exchange call reuses it.
        self.world.exchange_scratch.lock().unwrap().remove(&self.rank);
        self.world.phase2.wait();
        mine
    }

    fn isend(&self, dest: usize, _tag: i32, data: Vec<u8>) -> Self::Send {
        let _ = self.world.p2p_tx[self.rank][dest].send(data);
        ThreadSend
    }

    fn irecv(&self, src: usize, _tag: i32) -> Self::Recv {
        ThreadRecv {
            rx: self.world.p2p_rx[src][self.rank].clone(),
            src,
        }
    }

    fn wait_any_recv(pending: &mut Vec<Self::Recv>) -> (usize, Vec<u8>) {
        loop {
            let mut select = Select::new();
            for p in pending.iter() {
                select.recv(&p.rx);
            }
            let oper = select.select();
            let index = oper.index();
            match oper.recv(&pending[index].rx) {
                Ok(data) => {
                    pending.remove(index);
                    return (index, data);
                }
                Err(_) => {
                    // Channel closed with nothing queued; drop it and retry
                    // against the remaining peers.
                    pending.remove(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_releases_every_rank() {
        let results = ThreadFabric::run_world(4, |fabric| {
            fabric.barrier();
            fabric.rank()
        });
        let mut sorted = results;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn broadcast_delivers_root_value_to_everyone() {
        let results = ThreadFabric::run_world(5, |fabric| {
            let mut buf = if fabric.rank() == 2 {
                b"hello".to_vec()
            } else {
                Vec::new()
            };
            fabric.broadcast_bytes(2, &mut buf);
            buf
        });
        for buf in results {
            assert_eq!(buf, b"hello");
        }
    }

    #[test]
    fn broadcast_can_be_called_repeatedly() {
        let results = ThreadFabric::run_world(3, |fabric| {
            let mut first = if fabric.rank() == 0 { vec![1] } else { vec![] };
            fabric.broadcast_bytes(0, &mut first);
            let mut second = if fabric.rank() == 0 { vec![2] } else { vec![] };
            fabric.broadcast_bytes(0, &mut second);
            (first, second)
        });
        for (first, second) in results {
            assert_eq!(first, vec![1]);
            assert_eq!(second, vec![2]);
        }
    }

    #[test]
    fn all_reduce_and_is_false_if_any_rank_is_false() {
        let results = ThreadFabric::run_world(4, |fabric| {
            let mine = fabric.rank() != 3;
            fabric.all_reduce_and(mine)
        });
        assert!(results.iter().all(|r| !r));
    }

    #[test]
    fn all_reduce_and_is_true_when_everyone_agrees() {
        let results = ThreadFabric::run_world(4, |fabric| fabric.all_reduce_and(true));
        assert!(results.iter().all(|r| *r));
    }

    #[test]
    fn exchange_routes_payloads_to_addressed_ranks_only() {
        let results = ThreadFabric::run_world(3, |fabric| {
            let mut outgoing = HashMap::new();
            if fabric.rank() == 0 {
                outgoing.insert(1, b"for-one".to_vec());
                outgoing.insert(2, b"for-two".to_vec());
            }
            fabric.exchange_bytes(outgoing)
        });
        assert!(results[0].is_empty());
        assert_eq!(results[1].get(&0), Some(&b"for-one".to_vec()));
        assert_eq!(results[2].get(&0), Some(&b"for-two".to_vec()));
    }

    #[test]
    fn point_to_point_send_recv_round_trips() {
        let results = ThreadFabric::run_world(2, |fabric| {
            if fabric.rank() == 0 {
                fabric.send(1, 0, b"ping".to_vec()).unwrap();
                fabric.recv(1, 0).unwrap()
            } else {
                let msg = fabric.recv(0, 0).unwrap();
                fabric.send(0, 0, msg.clone()).unwrap();
                msg
            }
        });
        assert_eq!(results[0], b"ping");
        assert_eq!(results[1], b"ping");
    }

    #[test]
    fn wait_any_recv_returns_whichever_peer_sends_first() {
        let results = ThreadFabric::run_world(3, |fabric| {
            if fabric.rank() == 0 {
                // Rank 2 sends immediately; rank 1 waits for a barrier so
                // its message is posted later. wait_any must not block on
                // rank 1's slot when rank 2's is already ready.
                let mut pending = vec![fabric.irecv(1, 0), fabric.irecv(2, 0)];
                fabric.barrier();
                let (index, data) = ThreadFabric::wait_any_recv(&mut pending);
                fabric.barrier();
                Some((index, data))
            } else if fabric.rank() == 2 {
                fabric.send(0, 0, b"fast".to_vec()).unwrap();
                fabric.barrier();
                fabric.barrier();
                None
            } else {
                fabric.barrier();
                fabric.send(0, 0, b"slow".to_vec()).unwrap();
                fabric.barrier();
                None
            }
        });
        let (index, data) = results[0].clone().unwrap();
        assert_eq!(index, 1);
        assert_eq!(data, b"fast");
    }
}
