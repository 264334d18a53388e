use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(User::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(User::Email).string().not_null().unique_key())
                    .col(
                        ColumnDef::new(User::Username)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(User::ApiKey).string().not_null().unique_key())
                    .col(
                        ColumnDef::new(User::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProxyPool::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProxyPool::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProxyPool::ProxyType).string().not_null())
                    .col(ColumnDef::new(ProxyPool::IpAddress).string().not_null())
                    .col(ColumnDef::new(ProxyPool::Port).integer().not_null())
                    .col(ColumnDef::new(ProxyPool::Country).string().null())
                    .col(ColumnDef::new(ProxyPool::City).string().null())
                    .col(
                        ColumnDef::new(ProxyPool::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ProxyPool::ProxyUsername)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ProxyPool::ProxyPassword)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserAllocatedProxy::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserAllocatedProxy::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserAllocatedProxy::UserId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserAllocatedProxy::ProxyPoolId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserAllocatedProxy::GatewayPort)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserAllocatedProxy::AllocatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_allocated_proxies_user_id")
                            .from(UserAllocatedProxy::Table, UserAllocatedProxy::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_allocated_proxies_proxy_pool_id")
                            .from(UserAllocatedProxy::Table, UserAllocatedProxy::ProxyPoolId)
                            .to(ProxyPool::Table, ProxyPool::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One virtual port maps to exactly one upstream per user
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_user_allocated_proxies_user_port")
                    .table(UserAllocatedProxy::Table)
                    .col(UserAllocatedProxy::UserId)
                    .col(UserAllocatedProxy::GatewayPort)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscription::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscription::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Subscription::UserId)
                            .integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Subscription::Plan).string().not_null())
                    .col(
                        ColumnDef::new(Subscription::DataLimitGb)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscription::DataUsedGb)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Subscription::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Subscription::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_user_id")
                            .from(Subscription::Table, Subscription::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subscription::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserAllocatedProxy::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProxyPool::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum User {
    #[sea_orm(iden = "users")]
    Table,
    Id,
    Email,
    Username,
    ApiKey,
    IsActive,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ProxyPool {
    #[sea_orm(iden = "proxy_pools")]
    Table,
    Id,
    ProxyType,
    IpAddress,
    Port,
    Country,
    City,
    IsActive,
    ProxyUsername,
    ProxyPassword,
}

#[derive(DeriveIden)]
enum UserAllocatedProxy {
    #[sea_orm(iden = "user_allocated_proxies")]
    Table,
    Id,
    UserId,
    ProxyPoolId,
    GatewayPort,
    AllocatedAt,
}

#[derive(DeriveIden)]
enum Subscription {
    #[sea_orm(iden = "subscriptions")]
    Table,
    Id,
    UserId,
    Plan,
    DataLimitGb,
    DataUsedGb,
    IsActive,
    ExpiresAt,
}
