use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;

use super::{
    PageParams, SharedState, created, ensure, notify, ok, parse_field, project_role, require,
    require_non_empty,
};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::models::{NewNotification, NotificationKind, ProjectRole, ProjectWithRole};
use crate::permissions::Permission;
use crate::ws::{self, Event};

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateMemberRequest {
    pub role: String,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route(
            "/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/{id}/members", get(list_members).post(add_member))
        .route(
            "/{id}/members/{user_id}",
            put(update_member).delete(remove_member),
        )
        .route("/{id}/stats", get(project_stats))
}

async fn list_projects(
    State(state): State<SharedState>,
    caller: AuthUser,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = caller.id();
    let (limit, offset) = (page.limit(), page.offset());
    let projects = state
        .db
        .call(move |db| db.list_projects_for_user(user_id, limit, offset))
        .await?;
    Ok(page.respond(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    caller: AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_non_empty(&req.name, "name")?;
    let owner_id = caller.id();
    let project = state
        .db
        .call(move |db| {
            db.create_project(&req.name, req.description.as_deref().unwrap_or(""), owner_id)
        })
        .await?;
    tracing::info!(project_id = project.id, owner_id, "created project");
    ws::publish(
        &state.events,
        Event::ProjectCreated {
            project: project.clone(),
        },
    );
    Ok(created(project))
}

async fn get_project(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let role = require(&state, id, caller.id(), Permission::ViewProject).await?;
    let project = state
        .db
        .call(move |db| db.get_project(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Project", id))?;
    Ok(ok(ProjectWithRole { project, role }))
}

async fn update_project(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, id, caller.id(), Permission::EditProject).await?;
    if let Some(name) = &req.name {
        require_non_empty(name, "name")?;
    }
    let project = state
        .db
        .call(move |db| db.update_project(id, req.name.as_deref(), req.description.as_deref()))
        .await?;
    ws::publish(
        &state.events,
        Event::ProjectUpdated {
            project: project.clone(),
        },
    );
    Ok(ok(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, id, caller.id(), Permission::DeleteProject).await?;
    let deleted = state.db.call(move |db| db.delete_project(id)).await?;
    if !deleted {
        return Err(ApiError::not_found("Project", id));
    }
    tracing::info!(project_id = id, "deleted project");
    ws::publish(&state.events, Event::ProjectDeleted { project_id: id });
    Ok(StatusCode::NO_CONTENT)
}

async fn list_members(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, id, caller.id(), Permission::ViewProject).await?;
    let members = state.db.call(move |db| db.list_members(id)).await?;
    Ok(ok(members))
}

async fn add_member(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_role = require(&state, id, caller.id(), Permission::ManageMembers).await?;
    let role = match req.role.as_deref() {
        Some(r) => parse_field::<ProjectRole>(r)?,
        None => ProjectRole::Member,
    };
    if !actor_role.can_manage(role) {
        return Err(ApiError::Forbidden(format!(
            "Role {} cannot grant role {}",
            actor_role, role
        )));
    }

    let user = match (req.user_id, req.email) {
        (Some(user_id), _) => state
            .db
            .call(move |db| db.get_user(user_id))
            .await?
            .ok_or_else(|| ApiError::not_found("User", user_id))?,
        (None, Some(email)) => {
            let lookup = email.clone();
            state
                .db
                .call(move |db| db.find_user_by_email(&lookup))
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("No user with email {}", email)))?
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Either user_id or email is required".into(),
            ));
        }
    };

    let user_id = user.id;
    let member = state
        .db
        .call(move |db| {
            if db.get_member_role(id, user_id)?.is_some() {
                return Ok(None);
            }
            let member = db.add_member(id, user_id, role)?;
            let project_name = db.get_project(id)?.map(|p| p.name).unwrap_or_default();
            Ok(Some((member, project_name)))
        })
        .await?;
    let Some((member, project_name)) = member else {
        return Err(ApiError::Conflict(format!(
            "User {} is already a member of this project",
            user_id
        )));
    };

    tracing::info!(project_id = id, user_id, role = %role, "added member");
    ws::publish(
        &state.events,
        Event::MemberAdded {
            member: member.clone(),
        },
    );
    if user_id != caller.id() {
        notify(
            &state,
            vec![NewNotification {
                user_id,
                kind: NotificationKind::ProjectMemberAdded,
                title: format!("Added to {}", project_name),
                message: format!("{} added you to {} as {}", caller.user.name, project_name, role),
                project_id: Some(id),
                task_id: None,
            }],
        )
        .await;
    }
    Ok(created(member))
}

async fn update_member(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path((id, user_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_role = require(&state, id, caller.id(), Permission::ManageMembers).await?;
    let new_role = parse_field::<ProjectRole>(&req.role)?;
    let target = state
        .db
        .call(move |db| db.get_member(id, user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} is not a member", user_id)))?;

    if !actor_role.can_manage(target.role) || !actor_role.can_manage(new_role) {
        return Err(ApiError::Forbidden(format!(
            "Role {} cannot change {} to {}",
            actor_role, target.role, new_role
        )));
    }
    if target.role == new_role {
        return Ok(ok(target));
    }

    let old_role = target.role;
    let updated = state
        .db
        .call(move |db| {
            if old_role == ProjectRole::Owner && db.count_owners(id)? <= 1 {
                return Ok(None);
            }
            let member = db.update_member_role(id, user_id, new_role)?;
            let project_name = db.get_project(id)?.map(|p| p.name).unwrap_or_default();
            Ok(Some((member, project_name)))
        })
        .await?;
    let Some((member, project_name)) = updated else {
        return Err(ApiError::Conflict(
            "Cannot demote the last owner of a project".into(),
        ));
    };

    tracing::info!(project_id = id, user_id, from = %old_role, to = %new_role, "changed member role");
    ws::publish(
        &state.events,
        Event::MemberUpdated {
            member: member.clone(),
        },
    );
    if user_id != caller.id() {
        notify(
            &state,
            vec![NewNotification {
                user_id,
                kind: NotificationKind::ProjectRoleChanged,
                title: format!("Role changed in {}", project_name),
                message: format!("Your role in {} is now {}", project_name, new_role),
                project_id: Some(id),
                task_id: None,
            }],
        )
        .await;
    }
    Ok(ok(member))
}

async fn remove_member(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_role = project_role(&state, id, caller.id()).await?;
    let target = state
        .db
        .call(move |db| db.get_member(id, user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} is not a member", user_id)))?;

    if user_id != caller.id() {
        ensure(actor_role, Permission::ManageMembers)?;
        if !actor_role.can_manage(target.role) {
            return Err(ApiError::Forbidden(format!(
                "Role {} cannot remove a member with role {}",
                actor_role, target.role
            )));
        }
    }

    let removed = state
        .db
        .call(move |db| {
            if target.role == ProjectRole::Owner && db.count_owners(id)? <= 1 {
                return Ok(None);
            }
            db.remove_member(id, user_id).map(Some)
        })
        .await?;
    match removed {
        None => Err(ApiError::Conflict(
            "Cannot remove the last owner of a project".into(),
        )),
        Some(false) => Err(ApiError::NotFound(format!(
            "User {} is not a member",
            user_id
        ))),
        Some(true) => {
            tracing::info!(project_id = id, user_id, "removed member");
            ws::publish(
                &state.events,
                Event::MemberRemoved {
                    project_id: id,
                    user_id,
                },
            );
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

async fn project_stats(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, id, caller.id(), Permission::ViewProject).await?;
    let stats = state.db.call(move |db| db.project_stats(id)).await?;
    Ok(ok(stats))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::ws::Event;

    #[tokio::test]
    async fn test_create_list_and_get_project() {
        let state = test_state();
        let (_, token) = register(&state, "ada@example.com").await;
        let id = create_project(&state, &token, "Apollo").await;
        create_project(&state, &token, "Gemini").await;

        let (status, body) = send(&state, "GET", "/api/projects", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 2);
        assert_eq!(body["data"][0]["name"], "Gemini");
        assert_eq!(body["data"][0]["role"], "OWNER");

        let (status, body) =
            send(&state, "GET", &format!("/api/projects/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Apollo");
        assert_eq!(body["data"]["role"], "OWNER");
    }

    #[tokio::test]
    async fn test_create_project_requires_name() {
        let state = test_state();
        let (_, token) = register(&state, "ada@example.com").await;
        let (status, _) = send(
            &state,
            "POST",
            "/api/projects",
            Some(&token),
            Some(json!({"name": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_member_is_forbidden_and_missing_is_not_found() {
        let state = test_state();
        let (_, ada) = register(&state, "ada@example.com").await;
        let (_, bob) = register(&state, "bob@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;

        let (status, _) =
            send(&state, "GET", &format!("/api/projects/{id}"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&state, "GET", "/api/projects/999", Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_and_delete_respect_roles() {
        let state = test_state();
        let (_, ada) = register(&state, "ada@example.com").await;
        let (bob_id, bob) = register(&state, "bob@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;
        add_member(&state, &ada, id, bob_id, "ADMIN").await;

        let (status, body) = send(
            &state,
            "PUT",
            &format!("/api/projects/{id}"),
            Some(&bob),
            Some(json!({"description": "to the moon"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["description"], "to the moon");
        assert_eq!(body["data"]["name"], "Apollo");

        let (status, _) =
            send(&state, "DELETE", &format!("/api/projects/{id}"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) =
            send(&state, "DELETE", &format!("/api/projects/{id}"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) =
            send(&state, "GET", &format!("/api/projects/{id}"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_add_member_by_email_notifies_and_rejects_duplicates() {
        let state = test_state();
        let (_, ada) = register(&state, "ada@example.com").await;
        let (_, bob) = register(&state, "bob@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;

        let uri = format!("/api/projects/{id}/members");
        let payload = json!({"email": "bob@example.com", "role": "viewer"});
        let (status, body) = send(&state, "POST", &uri, Some(&ada), Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["role"], "VIEWER");

        let (status, _) = send(&state, "POST", &uri, Some(&ada), Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&state, "GET", "/api/notifications", Some(&bob), None).await;
        assert_eq!(body["data"][0]["kind"], "PROJECT_MEMBER_ADDED");

        let (status, body) = send(&state, "GET", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (status, _) = send(
            &state,
            "POST",
            &uri,
            Some(&ada),
            Some(json!({"email": "ghost@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_cannot_grant_owner() {
        let state = test_state();
        let (_, ada) = register(&state, "ada@example.com").await;
        let (bob_id, bob) = register(&state, "bob@example.com").await;
        let (carol_id, _) = register(&state, "carol@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;
        add_member(&state, &ada, id, bob_id, "ADMIN").await;

        let (status, _) = send(
            &state,
            "POST",
            &format!("/api/projects/{id}/members"),
            Some(&bob),
            Some(json!({"user_id": carol_id, "role": "OWNER"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        add_member(&state, &bob, id, carol_id, "MEMBER").await;
    }

    #[tokio::test]
    async fn test_member_cannot_manage_members() {
        let state = test_state();
        let (_, ada) = register(&state, "ada@example.com").await;
        let (bob_id, bob) = register(&state, "bob@example.com").await;
        let (carol_id, _) = register(&state, "carol@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;
        add_member(&state, &ada, id, bob_id, "MEMBER").await;

        let (status, _) = send(
            &state,
            "POST",
            &format!("/api/projects/{id}/members"),
            Some(&bob),
            Some(json!({"user_id": carol_id})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_change_role_and_last_owner_protection() {
        let state = test_state();
        let (ada_id, ada) = register(&state, "ada@example.com").await;
        let (bob_id, bob) = register(&state, "bob@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;
        add_member(&state, &ada, id, bob_id, "MEMBER").await;

        let (status, body) = send(
            &state,
            "PUT",
            &format!("/api/projects/{id}/members/{bob_id}"),
            Some(&ada),
            Some(json!({"role": "ADMIN"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["role"], "ADMIN");

        let (_, body) = send(&state, "GET", "/api/notifications", Some(&bob), None).await;
        assert_eq!(body["data"][0]["kind"], "PROJECT_ROLE_CHANGED");

        // An admin cannot touch the owner.
        let (status, _) = send(
            &state,
            "PUT",
            &format!("/api/projects/{id}/members/{ada_id}"),
            Some(&bob),
            Some(json!({"role": "MEMBER"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &state,
            "PUT",
            &format!("/api/projects/{id}/members/{ada_id}"),
            Some(&ada),
            Some(json!({"role": "ADMIN"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &state,
            "DELETE",
            &format!("/api/projects/{id}/members/{ada_id}"),
            Some(&ada),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_remove_member_and_leave_project() {
        let state = test_state();
        let (_, ada) = register(&state, "ada@example.com").await;
        let (bob_id, bob) = register(&state, "bob@example.com").await;
        let (carol_id, carol) = register(&state, "carol@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;
        add_member(&state, &ada, id, bob_id, "MEMBER").await;
        add_member(&state, &ada, id, carol_id, "VIEWER").await;

        // Members may not remove others, but may leave.
        let (status, _) = send(
            &state,
            "DELETE",
            &format!("/api/projects/{id}/members/{carol_id}"),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(
            &state,
            "DELETE",
            &format!("/api/projects/{id}/members/{bob_id}"),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &state,
            "DELETE",
            &format!("/api/projects/{id}/members/{carol_id}"),
            Some(&ada),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) =
            send(&state, "GET", &format!("/api/projects/{id}"), Some(&carol), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_project_stats() {
        let state = test_state();
        let (_, ada) = register(&state, "ada@example.com").await;
        let id = create_project(&state, &ada, "Apollo").await;
        let task = create_task(&state, &ada, id, "one").await;
        create_task(&state, &ada, id, "two").await;
        send(
            &state,
            "PATCH",
            &format!("/api/tasks/{task}/status"),
            Some(&ada),
            Some(json!({"status": "DONE"})),
        )
        .await;

        let (status, body) =
            send(&state, "GET", &format!("/api/projects/{id}/stats"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_tasks"], 2);
        assert_eq!(body["data"]["completion_percent"], 50.0);
    }

    #[tokio::test]
    async fn test_create_project_publishes_owner_event() {
        let state = test_state();
        let (ada_id, ada) = register(&state, "ada@example.com").await;
        let mut rx = state.events.subscribe();

        let project = create_project(&state, &ada, "Apollo").await;

        let events = drain_events(&mut rx);
        assert!(
            events.iter().any(|e| matches!(
                e,
                Event::ProjectCreated { project: p } if p.id == project && p.owner_id == ada_id
            )),
            "{events:?}"
        );
    }
}
