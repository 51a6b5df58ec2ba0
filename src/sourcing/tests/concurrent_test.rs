//! Concurrent Fetch Test
//!
//! Many callers hammering one sourcer must each get a distinct image.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::models::{FetchRequest, Source};

    use std::collections::BTreeSet;
    use std::time::Instant;

    #[test]
    fn test_concurrent_fetches_hand_out_distinct_images() {
        let pages: Vec<Vec<FakePost>> = (0..4)
            .map(|p| {
                (0..25)
                    .map(|i| FakePost::character(p * 1000 + i + 1, "cirno"))
                    .collect::<Vec<_>>()
            })
            .collect();
        let booru = FakeBooru::new().with_pages("cirno", pages);
        let sourcer = sourcer(booru, test_config(4));

        let start_time = Instant::now();
        let results: Vec<Vec<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let request = FetchRequest::new("cirno", Source::Gelbooru);
                        let mut md5s = Vec::new();
                        for _ in 0..10 {
                            if let Some(fetched) = sourcer.fetch(&request).unwrap() {
                                md5s.push(fetched.image.md5.to_hex());
                            }
                        }
                        md5s
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        println!("Concurrent fetches completed in {:?}", start_time.elapsed());

        let all: Vec<String> = results.into_iter().flatten().collect();
        let unique: BTreeSet<&String> = all.iter().collect();
        assert_eq!(all.len(), unique.len(), "an image was handed out twice");
        assert!(!all.is_empty());

        // At most one search per page: the lock serialized every fetch
        let mut searched = sourcer.provider.searched_pages();
        searched.sort_unstable();
        searched.dedup();
        assert_eq!(searched.len(), sourcer.provider.searched_pages().len());
    }
}
