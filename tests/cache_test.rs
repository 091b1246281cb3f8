//! Decode cache reading through a live dictionary

use std::sync::Arc;
use std::thread;
use strdict::error::{Error, Result};
use strdict::{CacheConfig, StringDictionary, StringIdCache, StringId, StringSource};

fn dictionary_with(n: usize) -> Result<(Arc<StringDictionary>, Vec<StringId>)> {
    let dict = Arc::new(StringDictionary::new_sync(n, 8, n)?);
    let strings: Vec<String> = (0..n).map(|i| format!("column-value-{}", i)).collect();
    let ids = dict.insert(&strings)?;
    Ok((dict, ids))
}

#[test]
fn test_reads_through_dictionary() -> Result<()> {
    let (dict, ids) = dictionary_with(100)?;
    let cache = StringIdCache::with_defaults(Arc::clone(&dict))?;

    for (i, &id) in ids.iter().enumerate() {
        assert_eq!(cache.get(id)?, format!("column-value-{}", i));
    }
    for &id in &ids {
        cache.get(id)?;
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 100);
    assert_eq!(stats.hits, 100);
    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.hit_rate, 0.5);
    Ok(())
}

#[test]
fn test_overfilled_bucket_evicts_lru() -> Result<()> {
    let (dict, ids) = dictionary_with(10)?;
    let config = CacheConfig {
        num_buckets: 1,
        entries_per_bucket: 4,
    };
    let cache = StringIdCache::new(Arc::clone(&dict), &config)?;

    for &id in &ids[0..5] {
        cache.get(id)?;
    }
    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.size, 4);

    // ids[0] was the least recently used and is gone
    cache.reset_stats();
    cache.get(ids[0])?;
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 0);

    // ids[4] is still cached
    cache.get(ids[4])?;
    assert_eq!(cache.stats().hits, 1);
    Ok(())
}

#[test]
fn test_invalidate_after_remove() -> Result<()> {
    let (dict, ids) = dictionary_with(4)?;
    let cache = StringIdCache::with_defaults(Arc::clone(&dict))?;
    cache.get(ids[2])?;

    dict.remove(&[ids[2]])?;
    // Still cached until invalidated
    assert_eq!(cache.get(ids[2])?, "column-value-2");

    assert!(cache.invalidate(ids[2]));
    assert!(matches!(cache.get(ids[2]), Err(Error::NotFound(_))));
    Ok(())
}

#[test]
fn test_cache_over_borrowed_source() -> Result<()> {
    let dict = StringDictionary::new_sync(8, 2, 8)?;
    let ids = dict.insert(&["left", "right"])?;
    let cache = StringIdCache::with_defaults(&dict)?;
    assert_eq!(cache.get_many(&ids)?, vec!["left", "right"]);
    assert_eq!(
        cache.source().fetch_string_by_id_nocache(ids[1])?,
        "right"
    );
    Ok(())
}

#[test]
fn test_concurrent_readers() -> Result<()> {
    let (dict, ids) = dictionary_with(500)?;
    let cache = Arc::new(StringIdCache::new(
        Arc::clone(&dict),
        &CacheConfig {
            num_buckets: 4,
            entries_per_bucket: 32,
        },
    )?);
    let ids = Arc::new(ids);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let ids = Arc::clone(&ids);
            thread::spawn(move || -> Result<()> {
                for round in 0..3 {
                    for (i, &id) in ids.iter().enumerate().skip(t).step_by(3 + round) {
                        assert_eq!(cache.get(id)?, format!("column-value-{}", i));
                    }
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("reader thread panicked")?;
    }

    let stats = cache.stats();
    assert!(stats.size <= 4 * 32);
    assert!(stats.evictions > 0);
    Ok(())
}
