use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RequestLog::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RequestLog::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(RequestLog::UserId).integer().not_null())
                    .col(ColumnDef::new(RequestLog::ProxyId).integer().not_null())
                    .col(ColumnDef::new(RequestLog::ProxyType).string().not_null())
                    .col(ColumnDef::new(RequestLog::ProxyIp).string().not_null())
                    .col(
                        ColumnDef::new(RequestLog::ProxyCountry)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(RequestLog::TargetHost)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(RequestLog::BytesUp)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::BytesDown)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::DataUsedMb)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(RequestLog::RequestDurationMs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(RequestLog::StatusCode).integer().not_null())
                    .col(ColumnDef::new(RequestLog::Success).boolean().not_null())
                    .col(
                        ColumnDef::new(RequestLog::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Per-user time-series queries
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_request_logs_user_id_timestamp")
                    .table(RequestLog::Table)
                    .col(RequestLog::UserId)
                    .col(RequestLog::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RequestLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RequestLog {
    #[sea_orm(iden = "request_logs")]
    Table,
    Id,
    UserId,
    ProxyId,
    ProxyType,
    ProxyIp,
    ProxyCountry,
    TargetHost,
    BytesUp,
    BytesDown,
    DataUsedMb,
    RequestDurationMs,
    StatusCode,
    Success,
    Timestamp,
}
