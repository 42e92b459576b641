//! Static role → permission table for project membership.
//!
//! | Role     | Permissions                                              |
//! |----------|----------------------------------------------------------|
//! | `OWNER`  | everything                                               |
//! | `ADMIN`  | everything except `DELETE_PROJECT`                       |
//! | `MEMBER` | view, create/edit tasks, comment, track time             |
//! | `VIEWER` | view only                                                |

use serde::Serialize;

use crate::models::ProjectRole;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ViewProject,
    EditProject,
    DeleteProject,
    ManageMembers,
    CreateTask,
    EditTask,
    DeleteTask,
    Comment,
    TrackTime,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Self::ViewProject,
        Self::EditProject,
        Self::DeleteProject,
        Self::ManageMembers,
        Self::CreateTask,
        Self::EditTask,
        Self::DeleteTask,
        Self::Comment,
        Self::TrackTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewProject => "VIEW_PROJECT",
            Self::EditProject => "EDIT_PROJECT",
            Self::DeleteProject => "DELETE_PROJECT",
            Self::ManageMembers => "MANAGE_MEMBERS",
            Self::CreateTask => "CREATE_TASK",
            Self::EditTask => "EDIT_TASK",
            Self::DeleteTask => "DELETE_TASK",
            Self::Comment => "COMMENT",
            Self::TrackTime => "TRACK_TIME",
        }
    }
}

const MEMBER_PERMISSIONS: &[Permission] = &[
    Permission::ViewProject,
    Permission::CreateTask,
    Permission::EditTask,
    Permission::Comment,
    Permission::TrackTime,
];

const VIEWER_PERMISSIONS: &[Permission] = &[Permission::ViewProject];

impl ProjectRole {
    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            Self::Owner => Permission::ALL.to_vec(),
            Self::Admin => Permission::ALL
                .iter()
                .copied()
                .filter(|p| *p != Permission::DeleteProject)
                .collect(),
            Self::Member => MEMBER_PERMISSIONS.to_vec(),
            Self::Viewer => VIEWER_PERMISSIONS.to_vec(),
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        match self {
            Self::Owner => true,
            Self::Admin => permission != Permission::DeleteProject,
            Self::Member => MEMBER_PERMISSIONS.contains(&permission),
            Self::Viewer => VIEWER_PERMISSIONS.contains(&permission),
        }
    }

    /// Whether a member holding `self` may grant, change or revoke `target`.
    pub fn can_manage(&self, target: ProjectRole) -> bool {
        match self {
            Self::Owner => true,
            Self::Admin => target != ProjectRole::Owner,
            Self::Member | Self::Viewer => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RolePermissions {
    pub role: ProjectRole,
    pub permissions: Vec<Permission>,
}

pub fn role_table() -> Vec<RolePermissions> {
    ProjectRole::ALL
        .iter()
        .map(|role| RolePermissions {
            role: *role,
            permissions: role.permissions(),
        })
        .collect()
}
