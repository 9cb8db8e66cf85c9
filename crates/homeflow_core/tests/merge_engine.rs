use chrono::{Local, NaiveDate};
use homeflow_core::db::open_db_in_memory;
use homeflow_core::repo::{AssignmentRepository, ChoreRepository, MemberRepository};
use homeflow_core::sync::change::{
    ChorePatch, EntityRef, MemberPatch, NewChore, NewMember, PointAdjustment, ToggleRequest,
};
use homeflow_core::sync::wire::{
    AppliedRecord, BatchPushRequest, FailureCode, WireChange,
};
use homeflow_core::{
    Assignment, Change, Chore, FamilyLocks, Member, MergeEngine, Recurrence, SchedulerConfig,
    SchedulerService, ServiceError, SqliteFamilyRepository,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn engine(repo: SqliteFamilyRepository<'_>) -> MergeEngine<SqliteFamilyRepository<'_>> {
    MergeEngine::new(repo, Arc::new(FamilyLocks::new()))
}

fn wire(change: Change) -> WireChange {
    WireChange::from_change(&change, None).unwrap()
}

fn keyed(change: Change, change_id: Uuid) -> WireChange {
    WireChange::from_change(&change, Some(change_id)).unwrap()
}

fn record(data: serde_json::Value) -> AppliedRecord {
    serde_json::from_value(data).unwrap()
}

fn seeded_assignment(repo: &SqliteFamilyRepository<'_>, family: Uuid) -> (Uuid, Assignment) {
    let member = repo.create_member(&Member::new(family, "Alex")).unwrap();
    let chore = repo
        .create_chore(&Chore::new(family, "Dishes", Recurrence::days(1).unwrap()))
        .unwrap();
    let assignment = Assignment::pending(
        family,
        chore,
        member,
        NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
    );
    repo.insert_assignment(&assignment).unwrap();
    (member, assignment)
}

#[test]
fn batch_reports_each_entry_in_input_order() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);

    let response = engine(repo).apply_batch(&BatchPushRequest {
        changes: vec![
            wire(Change::CreateMember(NewMember {
                local_id: None,
                name: "Alex".to_string(),
                avatar: None,
            })),
            wire(Change::UpdateMember(MemberPatch {
                id: Uuid::new_v4(),
                name: Some("Ghost".to_string()),
                avatar: None,
            })),
            WireChange {
                kind: "create_chore".to_string(),
                data: json!({
                    "name": "Dishes",
                    "difficulty": 0,
                    "recurrence": {"interval": 1, "unit": "day"}
                }),
                change_id: None,
            },
            WireChange {
                kind: "paint_fence".to_string(),
                data: json!({}),
                change_id: None,
            },
            wire(Change::CreateMember(NewMember {
                local_id: None,
                name: "Blair".to_string(),
                avatar: None,
            })),
        ],
    });

    let applied: Vec<usize> = response.applied.iter().map(|item| item.index).collect();
    assert_eq!(applied, vec![0, 4]);
    let failed: Vec<(usize, FailureCode)> = response
        .failed
        .iter()
        .map(|item| (item.index, item.code))
        .collect();
    assert_eq!(
        failed,
        vec![
            (1, FailureCode::NotFound),
            (2, FailureCode::Validation),
            (3, FailureCode::Validation),
        ]
    );

    let names: Vec<String> = repo
        .list_members()
        .unwrap()
        .into_iter()
        .map(|member| member.name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Alex".to_string()));
    assert!(names.contains(&"Blair".to_string()));
}

#[test]
fn local_ids_created_earlier_in_the_batch_resolve() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let local_member = Uuid::new_v4();

    let response = engine(repo).apply_batch(&BatchPushRequest {
        changes: vec![
            wire(Change::CreateMember(NewMember {
                local_id: Some(local_member),
                name: "Sam".to_string(),
                avatar: None,
            })),
            wire(Change::CreateChore(NewChore {
                local_id: Some(Uuid::new_v4()),
                name: "Trash".to_string(),
                difficulty: 2,
                recurrence: Recurrence::days(2).unwrap(),
                auto_assign: true,
                eligible_members: vec![local_member],
            })),
            wire(Change::AdjustPoints(PointAdjustment {
                member_id: local_member,
                points: 7,
                reason: Some("bonus".to_string()),
            })),
        ],
    });
    assert!(response.failed.is_empty());

    let AppliedRecord::Member { member, local_id } = record(response.applied[0].data.clone())
    else {
        panic!("first entry should be a member");
    };
    assert_eq!(local_id, Some(local_member));
    assert_ne!(member.id, local_member);

    let AppliedRecord::Chore { chore, .. } = record(response.applied[1].data.clone()) else {
        panic!("second entry should be a chore");
    };
    assert_eq!(chore.eligible_members, vec![member.id]);
    assert_eq!(repo.get_member(member.id).unwrap().unwrap().total_points, 7);
}

#[test]
fn replayed_change_id_returns_the_stored_result_without_reapplying() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let (member, assignment) = seeded_assignment(&repo, family);
    let merge = engine(repo);
    let change_id = Uuid::new_v4();
    let toggle = keyed(
        Change::ToggleAssignment(ToggleRequest {
            assignment_id: assignment.id,
            member_override: None,
        }),
        change_id,
    );

    let first = merge.apply_single(&toggle).unwrap();
    let second = merge.apply_single(&toggle).unwrap();

    assert_eq!(first, second);
    assert_eq!(repo.get_member(member).unwrap().unwrap().total_points, 10);
    assert!(repo.get_assignment(assignment.id).unwrap().unwrap().is_completed());
}

#[test]
fn failed_change_id_is_not_remembered() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let merge = engine(repo);
    let member_id = Uuid::new_v4();
    let change_id = Uuid::new_v4();
    let adjust = keyed(
        Change::AdjustPoints(PointAdjustment {
            member_id,
            points: 3,
            reason: None,
        }),
        change_id,
    );

    let err = merge.apply_single(&adjust).unwrap_err();
    assert_eq!(err.failure_code(), FailureCode::NotFound);

    repo.create_member(&Member::with_id(member_id, family, "Late"))
        .unwrap();
    merge.apply_single(&adjust).unwrap();
    assert_eq!(repo.get_member(member_id).unwrap().unwrap().total_points, 3);
}

#[test]
fn records_of_another_family_are_not_found() {
    let conn = open_db_in_memory().unwrap();
    let ours = Uuid::new_v4();
    let theirs = Uuid::new_v4();
    let their_repo = SqliteFamilyRepository::new(&conn, theirs);
    let (their_member, their_assignment) = seeded_assignment(&their_repo, theirs);
    let merge = engine(SqliteFamilyRepository::new(&conn, ours));

    for change in [
        Change::DeleteMember(EntityRef { id: their_member }),
        Change::ToggleAssignment(ToggleRequest {
            assignment_id: their_assignment.id,
            member_override: None,
        }),
    ] {
        let err = merge.apply_single(&wire(change)).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    assert!(their_repo.get_member(their_member).unwrap().is_some());
    assert!(!their_repo
        .get_assignment(their_assignment.id)
        .unwrap()
        .unwrap()
        .is_completed());
}

#[test]
fn toggle_with_foreign_override_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let (_, assignment) = seeded_assignment(&repo, family);
    let other_family = Uuid::new_v4();
    let outsider = SqliteFamilyRepository::new(&conn, other_family)
        .create_member(&Member::new(other_family, "Outsider"))
        .unwrap();

    let err = engine(repo)
        .apply_single(&wire(Change::ToggleAssignment(ToggleRequest {
            assignment_id: assignment.id,
            member_override: Some(outsider),
        })))
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotFound { entity: "member", .. }));
}

#[test]
fn deleting_a_chore_reverses_completed_credit() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let (member, assignment) = seeded_assignment(&repo, family);
    let merge = engine(repo);

    merge
        .apply_single(&wire(Change::ToggleAssignment(ToggleRequest {
            assignment_id: assignment.id,
            member_override: None,
        })))
        .unwrap();
    assert_eq!(repo.get_member(member).unwrap().unwrap().total_points, 10);

    let deleted = merge
        .apply_single(&wire(Change::DeleteChore(EntityRef {
            id: assignment.chore_id,
        })))
        .unwrap();

    assert_eq!(
        record(deleted),
        AppliedRecord::Deleted {
            id: assignment.chore_id
        }
    );
    assert_eq!(repo.get_member(member).unwrap().unwrap().total_points, 0);
    assert!(repo.get_assignment(assignment.id).unwrap().is_none());
}

#[test]
fn snapshot_carries_the_whole_family() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let (member, assignment) = seeded_assignment(&repo, family);
    let merge = engine(repo);
    merge
        .apply_single(&wire(Change::AdjustPoints(PointAdjustment {
            member_id: member,
            points: 2,
            reason: None,
        })))
        .unwrap();

    let snapshot = merge.snapshot().unwrap();

    assert_eq!(snapshot.members.len(), 1);
    assert_eq!(snapshot.chores.len(), 1);
    assert_eq!(snapshot.assignments, vec![assignment]);
    assert_eq!(snapshot.point_history.len(), 1);
    assert!(snapshot.timestamp > 0);
}

/// Two members sharing a daily chore, scheduled from today.
fn shared_daily_chore(repo: &SqliteFamilyRepository<'_>, family: Uuid) -> (Uuid, Uuid, Uuid) {
    let a = repo.create_member(&Member::new(family, "Alex")).unwrap();
    let b = repo.create_member(&Member::new(family, "Bea")).unwrap();
    let mut chore = Chore::new(family, "Dishes", Recurrence::days(1).unwrap());
    chore.set_eligible_members(vec![a, b]);
    let chore_id = repo.create_chore(&chore).unwrap();
    let created = SchedulerService::with_seed(
        *repo,
        SchedulerConfig::default(),
        Arc::new(FamilyLocks::new()),
        5,
    )
    .generate_assignments_today(None)
    .unwrap();
    assert!(created.iter().any(|assignment| assignment.member_id == b));
    (a, b, chore_id)
}

fn upcoming(repo: &SqliteFamilyRepository<'_>) -> Vec<Assignment> {
    let today = Local::now().date_naive();
    repo.list_assignments()
        .unwrap()
        .into_iter()
        .filter(|assignment| assignment.due_date >= today)
        .collect()
}

#[test]
fn narrowing_eligibility_regenerates_without_the_removed_member() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let (a, b, chore_id) = shared_daily_chore(&repo, family);
    let before = upcoming(&repo).len();

    let response = engine(repo).apply_batch(&BatchPushRequest {
        changes: vec![wire(Change::UpdateChore(ChorePatch {
            id: chore_id,
            name: None,
            difficulty: None,
            recurrence: None,
            auto_assign: None,
            eligible_members: Some(vec![a]),
        }))],
    });

    assert_eq!(response.applied.len(), 1);
    let after = upcoming(&repo);
    assert_eq!(after.len(), before);
    assert!(after.iter().all(|assignment| assignment.member_id != b));
}

#[test]
fn deleting_a_member_refills_their_slots() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let (a, b, _) = shared_daily_chore(&repo, family);
    let before = upcoming(&repo).len();

    engine(repo)
        .apply_single(&wire(Change::DeleteMember(EntityRef { id: b })))
        .unwrap();

    let after = upcoming(&repo);
    assert_eq!(after.len(), before);
    assert!(after.iter().all(|assignment| assignment.member_id == a));
}

#[test]
fn created_chore_with_unknown_eligible_member_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let family = Uuid::new_v4();
    let repo = SqliteFamilyRepository::new(&conn, family);
    let ghost = Uuid::new_v4();

    let err = engine(repo)
        .apply_single(&wire(Change::CreateChore(NewChore {
            local_id: None,
            name: "Dishes".to_string(),
            difficulty: 1,
            recurrence: Recurrence::days(1).unwrap(),
            auto_assign: true,
            eligible_members: vec![ghost],
        })))
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::NotFound {
            entity: "member",
            id
        } if id == ghost
    ));
    assert!(repo.list_chores().unwrap().is_empty());
}
