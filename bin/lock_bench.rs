use rand::distributions::Uniform;
use rand::Rng;
use std::sync::Arc;
use txlock::options::TransactionOptions;
use txlock::{LockManager, LockMode, PointLockManager, TransactionManager};

const NUM_TXNS: usize = 100000;
const LOCKS_PER_TXN: usize = 4;
const NUM_THREADS: usize = 8;

type Manager = TransactionManager<u64, PointLockManager<u64>>;

fn print_environment() {
    println!("txlock: version {}", env!("CARGO_PKG_VERSION"));

    let datetime = chrono::Utc::now();
    println!("Date: {:?}", datetime.naive_utc());
    println!("Threads: {}", NUM_THREADS);
}

fn print_arguments() {
    println!("Transactions: {}", NUM_TXNS);
    println!("Locks: {} per transaction", LOCKS_PER_TXN);
}

struct Outcome {
    committed: usize,
    deadlocks: usize,
}

struct BenchMark {
    manager: Arc<Manager>,
    pool: rayon::ThreadPool,
}

impl BenchMark {
    fn new() -> BenchMark {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        BenchMark {
            manager: Arc::new(Manager::new(TransactionOptions::default())),
            pool,
        }
    }

    fn reset(&mut self) {
        self.manager = Arc::new(Manager::new(TransactionOptions::default()));
    }

    /// Runs `NUM_TXNS` transactions over `num_resources` objects, a fraction
    /// `write_ratio` of the requests being exclusive.
    fn run(&mut self, num_resources: u64, write_ratio: f64) -> (Outcome, f64) {
        self.reset();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let start = std::time::Instant::now();

        let manager = self.manager.clone();
        self.pool.scope(|s| {
            for _ in 0..NUM_THREADS {
                let manager = manager.clone();
                let sender = sender.clone();
                s.spawn(move |_| {
                    let mut random =
                        rand::thread_rng().sample_iter(Uniform::new(0, num_resources));
                    let mut rng = rand::thread_rng();
                    let mut outcome = Outcome {
                        committed: 0,
                        deadlocks: 0,
                    };
                    for _ in 0..NUM_TXNS / NUM_THREADS {
                        let mut txn = Manager::begin(&manager);
                        let mut deadlocked = false;
                        for _ in 0..LOCKS_PER_TXN {
                            let resource = random.next().unwrap();
                            let mode = if rng.gen_bool(write_ratio) {
                                LockMode::Exclusive
                            } else {
                                LockMode::Shared
                            };
                            if txn.request_lock(&resource, mode).is_err() {
                                deadlocked = true;
                                break;
                            }
                        }
                        if deadlocked {
                            txn.rollback().unwrap();
                            outcome.deadlocks += 1;
                        } else {
                            txn.commit().unwrap();
                            outcome.committed += 1;
                        }
                    }
                    sender.send(outcome).unwrap();
                });
            }
        });
        drop(sender);

        let mut total = Outcome {
            committed: 0,
            deadlocks: 0,
        };
        for outcome in receiver.iter() {
            total.committed += outcome.committed;
            total.deadlocks += outcome.deadlocks;
        }
        let end = std::time::Instant::now();
        (total, (end - start).as_secs_f64())
    }

    fn report(&mut self, name: &str, num_resources: u64, write_ratio: f64) {
        let (outcome, elapsed) = self.run(num_resources, write_ratio);
        println!(
            "{}: {:?} txns/s | committed: {} | deadlocks: {} | locks: {}",
            name,
            (outcome.committed + outcome.deadlocks) as f64 / elapsed,
            outcome.committed,
            outcome.deadlocks,
            self.manager.lock_manager().num_locks()
        );
    }
}

fn main() {
    print_environment();
    print_arguments();

    println!("-------------------------------------------------");
    let mut benchmark = BenchMark::new();
    benchmark.report("read_only", 1000, 0.0);
    benchmark.report("read_mostly", 1000, 0.1);
    benchmark.report("write_heavy", 1000, 0.5);
    benchmark.report("hot_spot", 16, 0.5);
}
