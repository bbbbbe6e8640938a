use crate::models::User;

/// The four community roles. The numeric ids are fixed by the seeded `roles`
/// table and double as the permission level stored in `users.role_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Standard,
    Power,
    Police,
    Council,
}

impl Role {
    pub fn from_id(role_id: i32) -> Option<Role> {
        match role_id {
            1 => Some(Role::Standard),
            2 => Some(Role::Power),
            3 => Some(Role::Police),
            4 => Some(Role::Council),
            _ => None,
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Role::Standard => 1,
            Role::Power => 2,
            Role::Police => 3,
            Role::Council => 4,
        }
    }

    /// Forum/content moderation: viewing content reports, deleting any
    /// post or thread.
    pub fn can_moderate_content(self) -> bool {
        self == Role::Council
    }

    /// Crime-report handling: viewing every report and changing case status.
    pub fn can_manage_crime(self) -> bool {
        self == Role::Police
    }

    pub fn can_report_crime(self) -> bool {
        self == Role::Power
    }

    pub fn can_view_crime_stats(self) -> bool {
        matches!(self, Role::Police | Role::Council)
    }

    pub fn can_create_notification(self) -> bool {
        matches!(self, Role::Police | Role::Council)
    }

    /// Deletion is allowed for the content's owner and for Council,
    /// uniformly across posts and threads.
    pub fn can_delete_content(self, is_owner: bool) -> bool {
        is_owner || self == Role::Council
    }
}

/// Unknown role ids resolve to the lowest permission level.
pub fn role_of(user: &User) -> Role {
    Role::from_id(user.role_id).unwrap_or(Role::Standard)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Role; 4] = [Role::Standard, Role::Power, Role::Police, Role::Council];

    #[test]
    fn ids_round_trip() {
        for role in ALL {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(5), None);
    }

    #[test]
    fn only_council_moderates_content() {
        for role in ALL {
            assert_eq!(role.can_moderate_content(), role == Role::Council);
        }
    }

    #[test]
    fn only_police_manages_crime() {
        for role in ALL {
            assert_eq!(role.can_manage_crime(), role == Role::Police);
        }
    }

    #[test]
    fn only_power_reports_crime() {
        for role in ALL {
            assert_eq!(role.can_report_crime(), role == Role::Power);
        }
    }

    #[test]
    fn police_and_council_view_stats_and_notify() {
        for role in ALL {
            let elevated = role == Role::Police || role == Role::Council;
            assert_eq!(role.can_view_crime_stats(), elevated);
            assert_eq!(role.can_create_notification(), elevated);
        }
    }

    #[test]
    fn owner_or_council_deletes_content() {
        for role in ALL {
            assert!(role.can_delete_content(true));
            assert_eq!(role.can_delete_content(false), role == Role::Council);
        }
    }
}
