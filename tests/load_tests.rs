#[cfg(test)]
mod tests {
    use logpool::{Config, ExecutionMode, Logger, TaskError, TaskPool};
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    fn measure<F, T>(name: &str, f: F) -> (T, Duration)
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        (result, elapsed)
    }

    fn pool(mode: ExecutionMode, workers: usize) -> (TaskPool, Arc<Logger>) {
        let config = Config::default()
            .print_log(false)
            .keep_in_memory(true)
            .max_workers(workers)
            .mode(mode);
        let logger = Arc::new(Logger::new(&config).unwrap());
        let pool = TaskPool::new(&config, logger.clone()).unwrap();
        (pool, logger)
    }

    #[test]
    fn load_test_1_noop_threads() {
        println!("\n=== LOAD TEST 1: 1000 пустых задач (потоки) ===");
        let (pool, _logger) = pool(ExecutionMode::Thread, 4);

        let (_, elapsed) = measure("1000 noop tasks", || {
            for _ in 0..1000 {
                pool.execute("noop", || ()).unwrap();
            }
            pool.wait("noop");
        });

        assert_eq!(pool.get_queue("noop").unwrap().len(), 1000);
        assert!(elapsed < Duration::from_secs(30));
        assert_eq!(pool.metrics().completed_tasks, 1000);
    }

    #[cfg(unix)]
    #[test]
    fn load_test_2_noop_processes() {
        println!("\n=== LOAD TEST 2: 1000 пустых задач (процессы) ===");
        let (pool, _logger) = pool(ExecutionMode::Process, 4);

        let (_, elapsed) = measure("1000 forked noop tasks", || {
            for _ in 0..1000 {
                pool.execute("noop", || ()).unwrap();
            }
            pool.wait("noop");
        });

        let queue = pool.get_queue("noop").unwrap();
        assert_eq!(queue.len(), 1000);
        assert!(queue.iter().all(|d| *d));
        assert!(elapsed < Duration::from_secs(120));
        assert_eq!(pool.metrics().failed_tasks, 0);
    }

    #[cfg(unix)]
    #[test]
    fn load_test_3_process_results_and_failures() {
        println!("\n=== LOAD TEST 3: Результаты из дочерних процессов ===");
        let (pool, logger) = pool(ExecutionMode::Process, 4);

        let handles: Vec<_> = (0..50u64)
            .map(|i| {
                pool.submit("calc", move || {
                    if i == 7 {
                        Err(format!("item {i} rejected"))
                    } else {
                        Ok(vec![i; 3])
                    }
                })
                .unwrap()
            })
            .collect();
        pool.wait("calc");

        let mut failures = 0;
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(v) => assert_eq!(v, vec![i as u64; 3]),
                Err(TaskError::Failed { message, .. }) => {
                    assert_eq!(message, "item 7 rejected");
                    failures += 1;
                }
                Err(other) => panic!("unexpected failure: {other:?}"),
            }
        }
        assert_eq!(failures, 1);

        // Критическое сообщение пишет родительский процесс
        let critical: Vec<_> = logger
            .memory()
            .into_iter()
            .filter(|l| l.contains("[critical]"))
            .collect();
        assert_eq!(critical.len(), 1);
        assert!(critical[0].contains("String: item 7 rejected"));
    }

    #[test]
    fn load_test_4_many_groups() {
        println!("\n=== LOAD TEST 4: Много групп ===");
        let (pool, _logger) = pool(ExecutionMode::Thread, 8);

        let (_, _) = measure("20 groups x 100 tasks", || {
            for g in 0..20 {
                let group = format!("group-{g}");
                for i in 0..100u64 {
                    pool.execute(&group, move || {
                        std::thread::sleep(Duration::from_micros(100));
                        i + g
                    })
                    .unwrap();
                }
            }
            pool.wait_all();
        });

        for g in 0..20 {
            let metrics = pool.group_metrics(&format!("group-{g}")).unwrap();
            assert_eq!(metrics.completed, 100);
        }
        let metrics = pool.metrics();
        println!("  Success rate: {:.1}%", metrics.success_rate() * 100.0);
        assert_eq!(metrics.total_spawned, 2000);
    }

    #[test]
    fn load_test_5_concurrent_submitters() {
        println!("\n=== LOAD TEST 5: Конкурентная отправка в новую группу ===");
        let (pool, _logger) = pool(ExecutionMode::Thread, 4);
        let pool = Arc::new(pool);

        let submitters: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..125u32 {
                        pool.execute("shared", move || i).unwrap();
                    }
                })
            })
            .collect();
        for s in submitters {
            s.join().unwrap();
        }

        pool.wait("shared");
        assert_eq!(pool.get_queue("shared").unwrap().len(), 1000);
    }
}
