use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("mailbox_db")]
pub struct MailboxDb(sqlx::PgPool);
