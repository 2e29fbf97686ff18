use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};

use super::{DbError, Page, Pagination, Role, SortOrder, User, UserId};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserSort {
    Name,
    Email,
    #[default]
    CreatedAt,
}

impl UserSort {
    fn column(self) -> &'static str {
        match self {
            UserSort::Name => "name",
            UserSort::Email => "email",
            UserSort::CreatedAt => "id",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub sort: UserSort,
    pub order: SortOrder,
    pub page: Pagination,
}

pub struct UserManager<'a> {
    pool: &'a sqlx::SqlitePool,
}

impl<'a> UserManager<'a> {
    pub fn new(pool: &'a sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_filter<'q>(builder: &mut QueryBuilder<'q, Sqlite>, filter: &'q UserFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(role) = filter.role {
        builder.push(" AND role = ").push_bind(role);
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.trim().is_empty()) {
        let pattern = format!("%{}%", term.trim());
        builder
            .push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

impl UserManager<'_> {
    pub async fn get(&self, id: UserId) -> Result<User, DbError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool)
            .await?)
    }

    pub async fn list(&self, filter: &UserFilter) -> Result<Page<User>, DbError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count, filter);
        let total_count = count.build_query_scalar::<i64>().fetch_one(self.pool).await?;

        let (skip, limit) = (filter.page.skip(), filter.page.limit());
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM users");
        push_filter(&mut query, filter);
        query
            .push(format!(
                " ORDER BY {} {}, id ASC",
                filter.sort.column(),
                filter.order.sql()
            ))
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);
        let data = query.build_query_as::<User>().fetch_all(self.pool).await?;

        Ok(Page {
            data,
            total_count,
            skip,
            limit,
        })
    }

    pub async fn set_role(&self, id: UserId, role: Role) -> Result<User, DbError> {
        Ok(
            sqlx::query_as::<_, User>("UPDATE users SET role = ? WHERE id = ? RETURNING *")
                .bind(role)
                .bind(id)
                .fetch_one(self.pool)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(fixtures("users"))]
    async fn search_matches_name_and_email(pool: sqlx::SqlitePool) {
        let manager = UserManager::new(&pool);
        let search = |term: &str| UserFilter {
            search: Some(term.to_owned()),
            sort: UserSort::Name,
            order: SortOrder::Asc,
            ..Default::default()
        };
        let by_name = manager.list(&search("bea")).await.unwrap().data;
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].email, "buyer@example.com");

        let by_domain = manager.list(&search("example.com")).await.unwrap().data;
        assert_eq!(by_domain.len(), 4);
        assert_eq!(by_domain[0].name, "Ada Admin");
    }

    #[sqlx::test(fixtures("users"))]
    async fn list_filters_by_role_and_paginates(pool: sqlx::SqlitePool) {
        let manager = UserManager::new(&pool);
        let admins = manager
            .list(&UserFilter {
                role: Some(Role::Admin),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(admins.total_count, 1);

        let page = manager
            .list(&UserFilter {
                sort: UserSort::Email,
                order: SortOrder::Asc,
                page: Pagination {
                    skip: Some(1),
                    limit: Some(2),
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 4);
        let emails: Vec<_> = page.data.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["buyer@example.com", "other@example.com"]);
    }

    #[sqlx::test(fixtures("users"))]
    async fn set_role_promotes(pool: sqlx::SqlitePool) {
        let manager = UserManager::new(&pool);
        assert!(manager.set_role(2, Role::Admin).await.unwrap().is_admin());
        assert!(matches!(
            manager.set_role(99, Role::Admin).await,
            Err(DbError::NotFound)
        ));
    }
}
