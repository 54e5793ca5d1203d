#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use db::repositories::{
    BriefingRepository, BudgetRepository, OfficeRepository, TriggerEvent, TriggerRepository,
    UserRepository,
};
use pipeline_core::ports::{BriefingSource, BudgetSink, OfficeDirectory, TriggerSink, UserDirectory};
use pipeline_core::{
    AreaItem, BudgetStatus, HoursBreakdown, NewBudget, NewJob, PortError, ProjectData,
    UserContact, ValuesBreakdown,
};

fn project() -> ProjectData {
    ProjectData {
        project_name: "Project b-1".into(),
        typology: "residential".into(),
        areas: vec![AreaItem {
            name: "total".into(),
            area_m2: 120.0,
        }],
        disciplines: vec!["architecture".into()],
        raw: serde_json::json!({ "area_m2": 120.0 }),
    }
}

fn budget_for(briefing_id: &str) -> NewBudget {
    let job = NewJob::new(briefing_id, "user-1", "office-1").into_job();
    NewBudget::assemble(
        &job,
        &project(),
        &common::office("office-1"),
        HoursBreakdown {
            disciplines: Vec::new(),
            total_hours: 96.0,
        },
        ValuesBreakdown {
            currency: "BRL".into(),
            disciplines: Vec::new(),
            total_value: 17_280.0,
        },
    )
}

#[tokio::test]
async fn briefing_round_trip_and_budget_flag() -> Result<(), Box<dyn Error>> {
    let briefings = BriefingRepository::new(common::setup_db().await?);
    briefings.save(common::briefing("b-1")).await?;

    let loaded = briefings.get_briefing("b-1").await?.ok_or("briefing missing")?;
    assert_eq!(loaded.project_name, "Project b-1");
    assert_eq!(loaded.generated_budget(), None);
    assert!(briefings.get_briefing("b-404").await?.is_none());

    briefings.record_budget("b-1", "budget-1", &project()).await?;
    let updated = briefings.get_briefing("b-1").await?.ok_or("briefing missing")?;
    assert_eq!(updated.generated_budget(), Some("budget-1"));
    assert_eq!(updated.last_analysis, Some(project()));

    let missing = briefings.record_budget("b-404", "budget-2", &project()).await;
    assert!(matches!(missing, Err(PortError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn budgets_are_found_by_briefing() -> Result<(), Box<dyn Error>> {
    let budgets = BudgetRepository::new(common::setup_db().await?);
    assert_eq!(budgets.find_generated_for_briefing("b-1").await?, None);

    let id = budgets.create(budget_for("b-1")).await?;
    budgets.create(budget_for("b-2")).await?;

    assert_eq!(budgets.find_generated_for_briefing("b-1").await?, Some(id.clone()));

    let stored = budgets.list_for_briefing("b-1").await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].budget_id, id);
    assert_eq!(stored[0].budget.status, BudgetStatus::Draft);
    assert!(stored[0].budget.generated_automatically);
    assert_eq!(stored[0].budget.version, 1);
    let expected = budget_for("b-1");
    assert_eq!(stored[0].budget.hours, expected.hours);
    assert_eq!(stored[0].budget.values, expected.values);
    assert_eq!(stored[0].budget.areas, expected.areas);
    assert_eq!(stored[0].budget.created_by, "user-1");
    Ok(())
}

#[tokio::test]
async fn offices_and_users() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let offices = OfficeRepository::new(db.clone());
    let users = UserRepository::new(db);

    offices.save(common::office("office-1")).await?;
    assert_eq!(offices.office_config("office-1").await?.currency, "BRL");
    assert!(matches!(
        offices.office_config("office-404").await,
        Err(PortError::NotFound(_))
    ));

    users
        .save(UserContact {
            id: "user-1".into(),
            name: "Ana".into(),
            email: Some("ana@example.com".into()),
        })
        .await?;
    let user = users.get_user("user-1").await?.ok_or("user missing")?;
    assert_eq!(user.email.as_deref(), Some("ana@example.com"));
    assert!(users.get_user("user-404").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn triggers_are_logged_per_call() -> Result<(), Box<dyn Error>> {
    let triggers = TriggerRepository::new(common::setup_db().await?);

    triggers.on_budget_failed("b-1", "analysis failed").await?;
    triggers.on_budget_generated("budget-1", "b-1").await?;

    let logged = triggers.list_for_briefing("b-1").await?;
    assert_eq!(logged.len(), 2);
    let events: Vec<_> = logged.iter().map(|t| t.event).collect();
    assert!(events.contains(&TriggerEvent::BudgetFailed));
    assert!(events.contains(&TriggerEvent::BudgetGenerated));
    Ok(())
}
