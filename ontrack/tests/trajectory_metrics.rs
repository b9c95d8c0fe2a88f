use ontrack::core_modules::trajectory::TrajectorySample;
use ontrack::{MetricsError, Region, Trajectory, metrics};

const SCENARIO: &str = "0.00,0.0,0.0\n1.00,3.0,4.0\n2.00,3.0,4.0\n";

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn wandering() -> Trajectory {
    "0.00,1.0,1.0\n0.50,4.0,1.0\n1.25,4.0,5.0\n2.00,9.0,9.0\n3.50,2.0,2.0\n"
        .parse()
        .unwrap()
}

#[test]
fn scenario_displacement() {
    let trajectory: Trajectory = SCENARIO.parse().unwrap();
    assert_eq!(metrics::displacement(&trajectory), 5.0);
}

#[test]
fn scenario_dwell_times() {
    let trajectory: Trajectory = SCENARIO.parse().unwrap();
    let region = Region::new(0.0, 0.0, 5.0, 5.0).unwrap();
    assert_eq!(metrics::time_inside_region(&trajectory, &region), 2.0);
    assert_eq!(metrics::time_outside_region(&trajectory, &region), 0.0);
}

#[test]
fn short_trajectories_have_no_displacement() {
    let empty: Trajectory = "".parse().unwrap();
    let single: Trajectory = "3.00,7.0,7.0\n".parse().unwrap();
    assert_eq!(metrics::displacement(&empty), 0.0);
    assert_eq!(metrics::displacement(&single), 0.0);
}

#[test]
fn reversing_keeps_displacement() {
    let forward = wandering();
    let mut samples: Vec<TrajectorySample> = forward.samples().to_vec();
    samples.reverse();
    let backward = Trajectory::new(samples);
    assert!(close(
        metrics::displacement(&forward),
        metrics::displacement(&backward)
    ));
}

#[test]
fn same_region_splits_total_time() {
    let trajectory = wandering();
    let region = Region::new(0.0, 0.0, 5.0, 5.0).unwrap();
    let inside = metrics::time_inside_region(&trajectory, &region);
    let outside = metrics::time_outside_region(&trajectory, &region);
    assert!(close(inside, 2.75));
    assert!(close(outside, 0.75));
    assert!(close(inside + outside, trajectory.duration()));
}

#[test]
fn different_regions_need_not_add_up() {
    let trajectory = wandering();
    let small = Region::new(0.0, 0.0, 2.0, 2.0).unwrap();
    let large = Region::new(0.0, 0.0, 10.0, 10.0).unwrap();
    let inside = metrics::time_inside_region(&trajectory, &small);
    let outside = metrics::time_outside_region(&trajectory, &large);
    assert!(close(inside, 1.5));
    assert!(close(outside, 0.0));
    assert!(!close(inside + outside, trajectory.duration()));
}

#[test]
fn corner_order_does_not_matter() {
    let trajectory = wandering();
    let corners = [
        Region::new(0.0, 0.0, 5.0, 5.0).unwrap(),
        Region::new(5.0, 5.0, 0.0, 0.0).unwrap(),
        Region::new(0.0, 5.0, 5.0, 0.0).unwrap(),
        "5,0,0,5".parse::<Region>().unwrap(),
    ];
    for region in &corners {
        assert!(close(metrics::time_inside_region(&trajectory, region), 2.75));
        assert!(close(metrics::time_outside_region(&trajectory, region), 0.75));
    }
}

#[test]
fn trajectory_file_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.txt");
    std::fs::write(&path, SCENARIO).unwrap();

    let trajectory = Trajectory::load(&path).unwrap();
    assert_eq!(trajectory.len(), 3);
    assert_eq!(trajectory.duration(), 2.0);
}

#[test]
fn corrupt_file_gives_no_partial_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.txt");
    std::fs::write(&path, "0.00,0.0,0.0\n1.00,3.0\n").unwrap();

    let err = Trajectory::load(&path).unwrap_err();
    assert!(matches!(err, MetricsError::Malformed { line: 2, .. }));
}
