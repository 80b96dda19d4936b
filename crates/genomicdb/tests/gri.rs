use genomicdb::{
    Connection, Error, Session, Value,
    engine::mem::{Feature, MemEngine},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn session() -> Session<MemEngine> {
    let engine = MemEngine::new();
    engine.create_table("t");
    let session = Session::new(engine);
    session.create_gri("t", "rid", "beg", "end", 0).unwrap();
    session
}

/// The overlap predicate the index must reproduce exactly:
/// NOT (qbeg > end OR qend < beg).
fn overlaps(feature: &Feature, qbeg: i64, qend: i64) -> bool {
    !(qbeg > feature.end || qend < feature.beg)
}

fn brute_force(session: &Session<MemEngine>, qrid: i64, qbeg: i64, qend: i64) -> Vec<i64> {
    session
        .connection()
        .rows("t")
        .into_iter()
        .filter(|(_, f)| f.rid == qrid && f.end >= f.beg && overlaps(f, qbeg, qend))
        .map(|(rowid, _)| rowid)
        .collect()
}

fn query(session: &Session<MemEngine>, qrid: i64, qbeg: i64, qend: i64) -> Vec<i64> {
    session
        .overlapping_rowids("t", Value::Integer(qrid), qbeg, qend, None)
        .unwrap()
        .collect_rowids()
        .unwrap()
}

#[test]
fn point_query_includes_touching_features() {
    // Features on rid 3: [0,23), [12,34), [34,56); the probe at 34 picks
    // up the second and third, the first ends too early.
    let session = session();
    let conn = session.connection();
    let r1 = conn.insert("t", Feature::new(3, 0, 23)).unwrap();
    let r2 = conn.insert("t", Feature::new(3, 12, 34)).unwrap();
    let r3 = conn.insert("t", Feature::new(3, 34, 56)).unwrap();

    let rowids = query(&session, 3, 34, 34);
    assert_eq!(rowids, vec![r2, r3]);
    assert!(!rowids.contains(&r1));
}

#[test]
fn level_detection_tracks_mutations() {
    let session = session();
    let conn = session.connection();
    conn.insert("t", Feature::new(1, 100, 105)).unwrap(); // len 5    -> level 1
    conn.insert("t", Feature::new(1, 200, 320)).unwrap(); // len 120  -> level 2
    let big = conn.insert("t", Feature::new(2, 0, 2000)).unwrap(); // len 2000 -> level 3

    let bounds = session.gri_levels("t").unwrap().unwrap();
    assert_eq!((bounds.ceiling, bounds.floor), (3, 1));

    // Deleting the deepest feature invalidates the cached bounds.
    conn.delete("t", big).unwrap();
    let bounds = session.gri_levels("t").unwrap().unwrap();
    assert_eq!((bounds.ceiling, bounds.floor), (2, 1));

    // Unchanged connection state serves from the cache (same answer,
    // stamp unchanged).
    let stamp = conn.change_stamp().unwrap();
    let again = session.gri_levels("t").unwrap().unwrap();
    assert_eq!((again.ceiling, again.floor), (2, 1));
    assert_eq!(conn.change_stamp().unwrap(), stamp);
}

#[test]
fn empty_table_reports_the_sentinel() {
    let session = session();
    assert!(session.gri_levels("t").unwrap().is_none());
    let (ceiling, floor) = session.gri_levels_row("t").unwrap();
    assert!(ceiling < floor);
    assert!(query(&session, 1, 0, 1_000_000).is_empty());
}

#[test]
fn zero_length_and_whole_chromosome_features() {
    let session = session();
    let conn = session.connection();
    let point = conn.insert("t", Feature::new(1, 500, 500)).unwrap();
    let whole = conn
        .insert("t", Feature::new(1, 0, 248_956_422))
        .unwrap();

    // The zero-length feature sits at the query edge cases.
    assert!(query(&session, 1, 400, 600).contains(&point));
    assert!(query(&session, 1, 500, 500).contains(&point));
    assert!(!query(&session, 1, 501, 600).contains(&point));

    // The chromosome-spanning feature lands at level ceil(log16 len) and
    // is still found by a tiny probe.
    let bounds = session.gri_levels("t").unwrap().unwrap();
    assert_eq!(bounds.ceiling, 7); // 16^7 ~ 2.6e8 covers 2.49e8
    assert!(query(&session, 1, 123_456, 123_457).contains(&whole));
}

#[test]
fn invalid_intervals_never_match() {
    let session = session();
    let conn = session.connection();
    conn.insert("t", Feature::new(1, 100, 50)).unwrap(); // negative length: NULL level
    conn.insert("t", Feature::new(1, 10, 20)).unwrap();

    let rowids = query(&session, 1, 0, 1000);
    assert_eq!(rowids, vec![2]);
    let bounds = session.gri_levels("t").unwrap().unwrap();
    assert_eq!((bounds.ceiling, bounds.floor), (1, 1));
}

#[test]
fn rid_separation_is_strict() {
    let session = session();
    let conn = session.connection();
    conn.insert("t", Feature::new(1, 0, 100)).unwrap();
    let other = conn.insert("t", Feature::new(2, 0, 100)).unwrap();

    assert_eq!(query(&session, 2, 0, 50), vec![other]);
    assert!(query(&session, 3, 0, 50).is_empty());
}

#[test]
fn matches_brute_force_on_random_features() {
    let mut rng = StdRng::seed_from_u64(20_260_801);
    let session = session();
    let conn = session.connection();

    // Mixed scales: many small features, some huge, a few invalid.
    for _ in 0..2000 {
        let rid = rng.gen_range(1..=4);
        let beg = rng.gen_range(0..1_000_000i64);
        let len = match rng.gen_range(0..10) {
            0 => rng.gen_range(0..=1),
            1..=6 => rng.gen_range(1..200),
            7 | 8 => rng.gen_range(200..50_000),
            _ => rng.gen_range(50_000..3_000_000),
        };
        conn.insert("t", Feature::new(rid, beg, beg + len)).unwrap();
    }
    conn.insert("t", Feature::new(1, 777, 111)).unwrap(); // invalid

    for _ in 0..300 {
        let qrid = rng.gen_range(1..=5);
        let qbeg = rng.gen_range(0..1_200_000i64);
        let qend = qbeg + rng.gen_range(0..100_000i64);

        let got = query(&session, qrid, qbeg, qend);
        let expected = brute_force(&session, qrid, qbeg, qend);
        assert_eq!(got, expected, "query ({qrid}, {qbeg}, {qend})");

        // Explicit full bounds must agree with detected bounds.
        let full = session
            .overlapping_rowids("t", Value::Integer(qrid), qbeg, qend, Some((15, 0)))
            .unwrap()
            .collect_rowids()
            .unwrap();
        assert_eq!(full, expected, "full-bounds query ({qrid}, {qbeg}, {qend})");
    }
}

#[test]
fn results_are_ascending_and_deduplicated() {
    let mut rng = StdRng::seed_from_u64(9);
    let session = session();
    let conn = session.connection();
    for _ in 0..500 {
        let beg = rng.gen_range(0..1000i64);
        conn.insert("t", Feature::new(1, beg, beg + rng.gen_range(0..2000)))
            .unwrap();
    }

    let rowids = query(&session, 1, 0, 10_000);
    let mut sorted = rowids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(rowids, sorted);
}

#[test]
fn floored_index_still_finds_everything() {
    let engine = MemEngine::new();
    engine.create_table("t");
    let session = Session::new(engine);
    session.create_gri("t", "rid", "beg", "end", 2).unwrap();
    let conn = session.connection();

    let tiny = conn.insert("t", Feature::new(1, 10, 11)).unwrap();
    let small = conn.insert("t", Feature::new(1, 50, 60)).unwrap();

    // Every feature shallower than the floor lives at the floor level.
    let bounds = session.gri_levels("t").unwrap().unwrap();
    assert_eq!((bounds.ceiling, bounds.floor), (2, 2));
    assert_eq!(query(&session, 1, 0, 100), vec![tiny, small]);
}

#[test]
fn interrupt_cancels_detection_and_streams() {
    let session = session();
    let conn = session.connection();
    for i in 0..400i64 {
        conn.insert("t", Feature::new(1, i, i + 10)).unwrap();
    }

    conn.set_interrupted(true);
    assert!(matches!(
        genomicdb::gri::detect_levels(conn, "t"),
        Err(Error::Cancelled)
    ));

    conn.set_interrupted(false);
    let mut cursor = session
        .overlapping_rowids("t", Value::Integer(1), 0, 10_000, Some((15, 0)))
        .unwrap();
    conn.set_interrupted(true);
    let mut outcome = Ok(());
    for _ in 0..400 {
        match cursor.next_rowid() {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    assert!(matches!(outcome, Err(Error::Cancelled)));
    conn.set_interrupted(false);
}
