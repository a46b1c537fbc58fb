use artibrain_index::{
    IndexError, LEAF_CAPACITY, MAX_SPLIT_DEPTH, NeighborhoodIndex, Neighbour, Node, NodeId, Point,
    Quadtree, Record, Region, RegionChange, RelocationPolicy,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn random_points(rng: &mut SmallRng, count: usize, region: Region) -> Vec<Point> {
    (0..count)
        .map(|_| {
            Point::new(
                rng.random_range(region.min.x..=region.max.x),
                rng.random_range(region.min.y..=region.max.y),
            )
        })
        .collect()
}

fn brute_force(points: &[Point], center: Point, radius: f32) -> Vec<(usize, f32)> {
    let mut hits: Vec<(usize, f32)> = points
        .iter()
        .enumerate()
        .map(|(payload, point)| (payload, point.distance(center)))
        .filter(|&(_, distance)| distance <= radius)
        .collect();
    hits.sort_by(|a, b| a.1.total_cmp(&b.1));
    hits
}

#[test]
fn full_leaf_at_max_depth_rejects_inserts() {
    let mut tree = Quadtree::default();
    let point = Point::new(0.3, 0.3);
    for payload in 0..LEAF_CAPACITY {
        assert!(tree.insert(point, payload).is_some());
    }
    // Coincident points never separate: the first overflow splits all the way
    // down to the deepest level and still finds the leaf full.
    assert_eq!(tree.insert(point, 1_000), None);
    assert_eq!(tree.node_count(), 1 + 4 * MAX_SPLIT_DEPTH as usize);
    for attempt in 1..20 {
        assert_eq!(tree.insert(point, 1_000 + attempt), None);
    }

    let leaf = tree.locate(point);
    assert_eq!(tree.node_depth(leaf), Some(MAX_SPLIT_DEPTH));
    assert_eq!(tree.leaf_records(leaf).len(), LEAF_CAPACITY);
    assert_eq!(tree.len(), LEAF_CAPACITY);
    assert_eq!(tree.node_count(), 1 + 4 * MAX_SPLIT_DEPTH as usize);

    assert_eq!(tree.insert(point, 9_999), None);
    assert_eq!(tree.leaf_records(leaf).len(), LEAF_CAPACITY);
}

#[test]
fn overflow_keeps_splitting_until_the_leaf_has_room() {
    let mut tree = Quadtree::default();
    let points: Vec<Point> = (0..=LEAF_CAPACITY)
        .map(|i| Point::new(0.01 + 0.01 * i as f32, 0.2))
        .collect();
    for (payload, &point) in points.iter().enumerate() {
        assert!(tree.insert(point, payload).is_some(), "insert {payload} rejected");
    }
    assert_eq!(tree.len(), LEAF_CAPACITY + 1);

    // Everything lands in the low/low quadrant of the root, so the records
    // only separate one level further down.
    let leaf = tree.locate(points[0]);
    assert_eq!(tree.node_depth(leaf), Some(2));
    for record in tree.records() {
        assert_eq!(tree.get(record.id).map(|found| found.payload), Some(record.payload));
    }
}

#[test]
fn resize_splits_records_crowded_into_one_quadrant() {
    let mut tree = Quadtree::default();
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    let points = random_points(&mut rng, 50, Region::UNIT);
    for (payload, &point) in points.iter().enumerate() {
        tree.insert(point, payload).expect("inserted");
    }

    // Under the grown region every old record sits in the high/high quadrant.
    let grown = Region::from_bounds(-10.0, 10.0, -5.0, 5.0);
    tree.resize(grown).expect("resized");
    assert_eq!(tree.region(), grown);
    assert_eq!(tree.len(), 50);
    let mut payloads: Vec<usize> = tree.records().map(|record| record.payload).collect();
    payloads.sort_unstable();
    assert_eq!(payloads, (0..50).collect::<Vec<_>>());
}

#[test]
fn split_redistributes_every_record() {
    let mut tree = Quadtree::default();
    let mut rng = SmallRng::seed_from_u64(0x5EED);
    let points = random_points(&mut rng, LEAF_CAPACITY, Region::UNIT);
    for (payload, &point) in points.iter().enumerate() {
        tree.insert(point, payload).expect("inserted");
    }
    let before: Vec<Record> = tree.leaf_records(NodeId::ROOT).to_vec();
    assert_eq!(before.len(), LEAF_CAPACITY);

    let extra = Point::new(0.75, 0.25);
    let extra_id = tree.insert(extra, 500).expect("inserted after split");

    let Some(&Node::Internal { children, .. }) = tree.node(NodeId::ROOT) else {
        panic!("root should have split");
    };
    let mid = Region::UNIT.midpoint();
    let mut after: Vec<Record> = Vec::new();
    for (quadrant, child) in children.into_iter().enumerate() {
        for record in tree.leaf_records(child) {
            assert_eq!(
                artibrain_index::quadrant_about(record.point, mid),
                quadrant,
                "record {} landed in the wrong quadrant",
                record.payload
            );
            if record.id != extra_id {
                after.push(*record);
            }
        }
    }
    assert_eq!(after.len(), before.len());
    for record in &before {
        assert!(
            after
                .iter()
                .any(|moved| moved.point == record.point && moved.payload == record.payload),
            "record {} lost in split",
            record.payload
        );
    }
    assert_eq!(tree.get(extra_id).map(|record| record.payload), Some(500));
}

#[test]
fn inserts_outside_bounds_grow_the_region() {
    let mut tree = Quadtree::default();
    let inside = tree.insert(Point::new(0.5, 0.5), 0).expect("inserted");
    assert_eq!(inside.path() & 0b11, 0b11);

    tree.insert(Point::new(5.0, -3.0), 1).expect("inserted");
    assert_eq!(tree.region(), Region::from_bounds(0.0, 5.0, -3.0, 1.0));
    assert_eq!(tree.len(), 2);
    for record in tree.records() {
        assert!(tree.region().contains(record.point));
        assert_eq!(tree.get(record.id).map(|found| found.payload), Some(record.payload));
    }
}

#[test]
fn every_record_stays_inside_the_region() {
    let mut tree = Quadtree::default();
    let mut rng = SmallRng::seed_from_u64(11);
    let points = random_points(&mut rng, 600, Region::from_bounds(-20.0, 35.0, -8.0, 12.0));
    for (payload, &point) in points.iter().enumerate() {
        tree.insert(point, payload).expect("inserted");
        if payload % 97 == 0 {
            let grown = tree
                .region()
                .union_point(Point::new(payload as f32, -(payload as f32)));
            tree.resize(grown).expect("resized");
        }
    }
    assert_eq!(tree.len(), points.len());
    let region = tree.region();
    let mut seen = vec![false; points.len()];
    for record in tree.records() {
        assert!(region.contains(record.point));
        assert_eq!(tree.get(record.id).map(|found| found.payload), Some(record.payload));
        seen[record.payload] = true;
    }
    assert!(seen.into_iter().all(|found| found));
}

#[test]
fn neighbour_search_matches_brute_force() {
    let region = Region::from_bounds(0.0, 10.0, 0.0, 10.0);
    let mut tree = Quadtree::new(region);
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    let points = random_points(&mut rng, 800, region);
    for (payload, &point) in points.iter().enumerate() {
        tree.insert(point, payload).expect("inserted");
    }

    let mut out: Vec<Neighbour> = Vec::new();
    for _ in 0..40 {
        let center = Point::new(rng.random_range(-1.0..11.0), rng.random_range(-1.0..11.0));
        let radius = rng.random_range(0.1..3.0);
        let expected = brute_force(&points, center, radius);

        let search = tree.find_neighbours(center, radius, &mut out, usize::MAX);
        assert_eq!(search.written, expected.len());
        assert_eq!(search.total_found, expected.len());
        assert!(!search.truncated());
        assert!(out.windows(2).all(|pair| pair[0].distance <= pair[1].distance));

        let mut found: Vec<usize> = out.iter().map(|n| n.record.payload).collect();
        let mut wanted: Vec<usize> = expected.iter().map(|&(payload, _)| payload).collect();
        found.sort_unstable();
        wanted.sort_unstable();
        assert_eq!(found, wanted);

        let mut visited = Vec::new();
        tree.neighbors_within(center, radius, &mut |payload, distance| {
            visited.push((payload, distance.into_inner()));
        });
        assert_eq!(visited.len(), expected.len());
        for (payload, distance) in visited {
            assert_eq!(distance, points[payload].distance(center));
        }
    }
}

#[test]
fn truncated_search_keeps_the_nearest() {
    let mut tree = Quadtree::new(Region::from_bounds(0.0, 10.0, 0.0, 10.0));
    let mut points = Vec::new();
    for y in 0..10 {
        for x in 0..10 {
            points.push(Point::new(x as f32 + 0.5, y as f32 + 0.5));
        }
    }
    for (payload, &point) in points.iter().enumerate() {
        tree.insert(point, payload).expect("inserted");
    }

    let center = Point::new(4.9, 5.2);
    let expected = brute_force(&points, center, 3.0);
    assert!(expected.len() > 6);

    let mut out = Vec::with_capacity(6);
    let search = tree.find_neighbours(center, 3.0, &mut out, 6);
    assert_eq!(search.written, 6);
    assert_eq!(search.total_found, expected.len());
    assert!(search.truncated());
    let distances: Vec<f32> = out.iter().map(|n| n.distance).collect();
    let nearest: Vec<f32> = expected.iter().take(6).map(|&(_, d)| d).collect();
    assert_eq!(distances, nearest);

    let search = tree.find_neighbours(center, 3.0, &mut out, 0);
    assert_eq!(search.written, 0);
    assert!(out.is_empty());
    assert_eq!(search.total_found, expected.len());
}

#[test]
fn ensure_region_only_rebuilds_when_needed() {
    let mut tree = Quadtree::default();
    tree.insert(Point::new(0.2, 0.2), 0).expect("inserted");
    assert_eq!(
        tree.ensure_region(Region::from_bounds(0.1, 0.9, 0.1, 0.9)),
        Ok(RegionChange::Unchanged)
    );
    assert_eq!(tree.region(), Region::UNIT);

    assert_eq!(
        tree.ensure_region(Region::from_bounds(-4.0, 0.5, 0.0, 2.0)),
        Ok(RegionChange::Rebuilt)
    );
    assert_eq!(tree.region(), Region::from_bounds(-4.0, 1.0, 0.0, 2.0));
    assert_eq!(tree.len(), 1);

    assert!(matches!(
        tree.ensure_region(Region::from_bounds(1.0, 0.0, 0.0, 1.0)),
        Err(IndexError::InvalidRegion(_))
    ));
}

#[test]
fn resize_refuses_to_drop_records() {
    let mut tree = Quadtree::new(Region::from_bounds(0.0, 4.0, 0.0, 4.0));
    let id = tree.insert(Point::new(3.5, 3.5), 7).expect("inserted");
    let result = tree.resize(Region::from_bounds(0.0, 2.0, 0.0, 2.0));
    assert!(matches!(result, Err(IndexError::InvalidRegion(_))));
    assert_eq!(tree.region(), Region::from_bounds(0.0, 4.0, 0.0, 4.0));
    assert_eq!(tree.get(id).map(|record| record.payload), Some(7));
}

/// Fill the root of a freshly resized tree until it splits.
fn force_root_split(tree: &mut Quadtree) {
    for i in 0..LEAF_CAPACITY {
        let x = -0.95 + i as f32 * 0.06;
        tree.insert(Point::new(x, -0.5), 100 + i).expect("inserted");
    }
    assert!(!tree.node(NodeId::ROOT).expect("root").is_leaf());
}

#[test]
fn recompute_policy_rekeys_records_on_resize() {
    let mut tree = Quadtree::with_policy(Region::UNIT, RelocationPolicy::RecomputePath);
    assert_eq!(tree.policy(), RelocationPolicy::RecomputePath);
    let point = Point::new(0.4, 0.4);
    let old_id = tree.insert(point, 0).expect("inserted");
    assert_eq!(old_id.path() & 0b11, 0b00);

    tree.resize(Region::from_bounds(-1.0, 1.0, -1.0, 1.0)).expect("resized");
    let new_id = tree
        .records()
        .find(|record| record.payload == 0)
        .map(|record| record.id)
        .expect("record kept");
    assert_eq!(new_id.path() & 0b11, 0b11);

    force_root_split(&mut tree);
    assert_eq!(tree.get(new_id).map(|record| record.point), Some(point));
    assert_eq!(tree.erase(new_id).map(|record| record.payload), Some(0));
}

#[test]
fn preserve_policy_keeps_ids_but_strands_records_after_split() {
    let mut tree = Quadtree::with_policy(Region::UNIT, RelocationPolicy::PreservePath);
    assert_eq!(tree.policy(), RelocationPolicy::PreservePath);
    let point = Point::new(0.4, 0.4);
    let id = tree.insert(point, 0).expect("inserted");

    tree.resize(Region::from_bounds(-1.0, 1.0, -1.0, 1.0)).expect("resized");
    // Root is still a single leaf, so the stale path resolves.
    assert_eq!(tree.get(id).map(|record| record.payload), Some(0));

    force_root_split(&mut tree);
    // The split files the record under high-x/high-y by its point while its id
    // still names low-x/low-y, so lookups by id miss it.
    assert!(tree.get(id).is_none());
    assert!(tree.erase(id).is_none());
    assert!(tree.records().any(|record| record.id == id));

    let mut out = Vec::new();
    tree.find_neighbours(point, 0.01, &mut out, 4);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].record.id, id);
}

#[test]
fn trait_rebuild_replaces_contents() {
    let mut tree = Quadtree::default();
    tree.insert(Point::new(0.5, 0.5), 42).expect("inserted");

    let positions = [
        Point::new(-3.0, 1.0),
        Point::new(2.0, 2.0),
        Point::new(0.25, 0.75),
    ];
    let ids = tree.rebuild(&positions).expect("rebuilt");
    assert_eq!(ids.len(), positions.len());
    assert_eq!(tree.len(), positions.len());
    for (payload, id) in ids.into_iter().enumerate() {
        let id = id.expect("placed");
        let record = tree.get(id).expect("record");
        assert_eq!(record.payload, payload);
        assert_eq!(record.point, positions[payload]);
    }
    assert!(tree.records().all(|record| record.payload != 42));

    assert!(tree.rebuild(&[]).expect("cleared").is_empty());
    assert!(tree.is_empty());
    assert_eq!(
        tree.rebuild(&[Point::new(f32::NAN, 0.0)]),
        Err(IndexError::InvalidRegion("positions must be finite"))
    );
}
