use std::sync::Arc;

use super::*;
use crate::test_support::{StubFetcher, course_xml, upstream_with};

const ANALYSIS: &str = "https://ufind.example/courses/140135/2024W";
const ALGEBRA: &str = "https://ufind.example/courses/250059/2024W";
const PHYSICS: &str = "https://ufind.example/courses/260001/2024W";

fn stub() -> Arc<StubFetcher> {
    Arc::new(
        StubFetcher::new()
            .with(ANALYSIS, course_xml("140135", Some("Analysis"), Some("Calculus"), Some("VO"), &[1]))
            .with(ALGEBRA, course_xml("250059", None, Some("Algebra"), Some("UE"), &[1, 2]))
            .with(PHYSICS, course_xml("260001", Some("Physik"), None, Some("PUE"), &[1])),
    )
}

async fn resolver(stub: Arc<StubFetcher>) -> IdentityResolver {
    IdentityResolver::new(
        FeedStore::in_memory().await.unwrap(),
        upstream_with(stub),
        PathGenerator::with_alphabet(12, crate::path::DEFAULT_ALPHABET).unwrap(),
    )
}

fn client() -> ClientKey {
    ClientKey::Address("10.0.0.1".to_string())
}

#[tokio::test]
async fn course_creation_is_idempotent() {
    let stub = stub();
    let resolver = resolver(stub.clone()).await;

    let first = resolver
        .find_or_create_course("140135", 1, "2024W", &client())
        .await
        .unwrap();
    assert_eq!(first.name, "Analysis");
    assert_eq!(first.course_type, "VO");

    let second = resolver
        .find_or_create_course("140135", 1, "2024W", &client())
        .await
        .unwrap();
    assert_eq!(first, second);
    // the second call never reached upstream
    assert_eq!(stub.calls(ANALYSIS), 1);
}

#[tokio::test]
async fn name_falls_back_to_second_language() {
    let resolver = resolver(stub()).await;
    let course = resolver
        .find_or_create_course("250059", 2, "2024W", &client())
        .await
        .unwrap();
    assert_eq!(course.name, "Algebra");
    assert_eq!(course.group, 2);
}

#[tokio::test]
async fn unknown_group_is_rejected_and_not_stored() {
    let resolver = resolver(stub()).await;

    let err = resolver
        .find_or_create_course("140135", 7, "2024W", &client())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Upstream(UpstreamError::GroupNotFound { ref path, group: 7 }) if path == "140135"
    ));
    assert_eq!(
        resolver.store().find_course("140135", 7, "2024W").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn unreachable_directory_is_upstream_error() {
    let resolver = resolver(stub()).await;
    let err = resolver
        .find_or_create_course("999999", 1, "2024W", &client())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Upstream);
}

#[tokio::test]
async fn feed_identity_is_the_course_set() {
    let resolver = resolver(stub()).await;
    let a = resolver.find_or_create_course("140135", 1, "2024W", &client()).await.unwrap();
    let b = resolver.find_or_create_course("250059", 2, "2024W", &client()).await.unwrap();
    let c = resolver.find_or_create_course("260001", 1, "2024W", &client()).await.unwrap();

    let ab = resolver.find_or_create_feed(&[a.clone(), b.clone()]).await.unwrap();
    let ba = resolver.find_or_create_feed(&[b.clone(), a.clone()]).await.unwrap();
    assert_eq!(ab, ba);

    let with_dupes = resolver
        .find_or_create_feed(&[a.clone(), b.clone(), a.clone()])
        .await
        .unwrap();
    assert_eq!(ab, with_dupes);

    let abc = resolver.find_or_create_feed(&[a.clone(), b.clone(), c]).await.unwrap();
    assert_ne!(ab.path, abc.path);

    let just_a = resolver.find_or_create_feed(&[a]).await.unwrap();
    assert_ne!(ab.path, just_a.path);

    assert_eq!(ab.path.len(), 12);
    assert!(ab.path.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
}

#[tokio::test]
async fn feed_keeps_creation_order() {
    let resolver = resolver(stub()).await;
    let a = resolver.find_or_create_course("140135", 1, "2024W", &client()).await.unwrap();
    let b = resolver.find_or_create_course("250059", 2, "2024W", &client()).await.unwrap();

    let feed = resolver.find_or_create_feed(&[b.clone(), a.clone()]).await.unwrap();
    let stored = resolver.store().feed_courses(feed.id).await.unwrap();
    assert_eq!(stored, vec![b, a]);
}

#[tokio::test]
async fn empty_feed_is_a_validation_error() {
    let resolver = resolver(stub()).await;
    let err = resolver.find_or_create_feed(&[]).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn concurrent_creation_converges() {
    let resolver = resolver(stub()).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(async move {
            let a = resolver
                .find_or_create_course("140135", 1, "2024W", &ClientKey::Internal)
                .await?;
            let b = resolver
                .find_or_create_course("250059", 2, "2024W", &ClientKey::Internal)
                .await?;
            resolver.find_or_create_feed(&[a, b]).await
        }));
    }

    let mut paths = HashSet::new();
    for handle in handles {
        paths.insert(handle.await.unwrap().unwrap().path);
    }
    assert_eq!(paths.len(), 1);

    let course = resolver.store().find_course("140135", 1, "2024W").await.unwrap().unwrap();
    let feed = resolver
        .store()
        .find_feed_by_path(paths.iter().next().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(resolver.store().feed_courses(feed.id).await.unwrap().contains(&course));
}
