//! First queries racing each other on a shared Retriever.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use protoret_retriever::{
    EncodeError, Encoder, RetrievalState, Retriever, RetrieverOptions, TopK, VecCorpus,
};

/// Maps scalar `x` to `[cos x, sin x]`, slowly, counting batches.
struct SlowAngles {
    batches: AtomicUsize,
}

impl Encoder<f32> for SlowAngles {
    fn encode(&self, batch: &[f32]) -> Result<Vec<Vec<f32>>, EncodeError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        Ok(batch.iter().map(|&x| vec![x.cos(), x.sin()]).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(2)
    }
}

fn angles() -> Vec<f32> {
    (0..12).map(|i| i as f32 * 0.25).collect()
}

#[test]
fn concurrent_first_queries_build_once() {
    let enc = Arc::new(SlowAngles {
        batches: AtomicUsize::new(0),
    });
    let r = Arc::new(Retriever::<f32>::new(
        enc.clone(),
        RetrieverOptions::default().with_corpus(VecCorpus::new(angles(), 4)),
    ));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let r = r.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let q = angles()[i];
                let res = r.predict(&[q]).unwrap();
                (i, res[0].top().map(|t| t.0))
            })
        })
        .collect();
    for h in handles {
        let (i, top) = h.join().unwrap();
        assert_eq!(top, Some(i));
    }

    // Three corpus batches, then one batch per query.
    assert_eq!(enc.batches.load(Ordering::SeqCst), 3 + threads);
    assert_eq!(r.state(), RetrievalState::Ready);
}

#[test]
fn repeated_queries_are_deterministic() {
    let enc = Arc::new(SlowAngles {
        batches: AtomicUsize::new(0),
    });
    let r = Retriever::<f32>::new(
        enc,
        RetrieverOptions::default()
            .with_corpus(VecCorpus::new(angles(), 5))
            .with_top_k(TopK::K(5)),
    );
    let queries = [0.1f32, 1.3, 2.9];
    let first = r.predict(&queries).unwrap();
    let second = r.predict(&queries).unwrap();
    assert_eq!(first, second);
    assert!(first.iter().all(|res| res.len() == 5));
}
