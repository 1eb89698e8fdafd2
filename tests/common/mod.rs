#![allow(dead_code)]

use adminlens::schema::Association;
use adminlens::{CollectionDef, CollectionRegistry, QueryError, RegistryBuilder};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait,
    RelationTrait, Schema, Set,
};
use std::sync::Arc;
use uuid::Uuid;

pub const RICHARD_UUID: &str = "1a11dc05-4e04-4d8f-958b-0a9f23a141a3";

pub mod user {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(unique)]
        pub email: String,
        pub email_valid: Option<bool>,
        pub first_name: Option<String>,
        pub last_name: Option<String>,
        pub username: Option<String>,
        pub password: Option<String>,
        pub created_at: Option<DateTimeUtc>,
        pub updated_at: Option<DateTimeUtc>,
        pub reset_password_token: Option<String>,
        pub uuid: Option<Uuid>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::address::Entity")]
        Address,
    }

    impl Related<super::address::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Address.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod address {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "addresses")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub line: Option<String>,
        pub zip_code: Option<String>,
        pub city: Option<String>,
        pub country: Option<String>,
        pub user_id: Option<i32>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::user::Entity",
            from = "Column::UserId",
            to = "super::user::Column::Id"
        )]
        User,
    }

    impl Related<super::user::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::User.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod bike {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "bikes")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub name: String,
        pub created_at: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod log {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "logs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub code: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub trace: String,
        pub stack: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod order {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "orders")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub amount: Option<i32>,
        pub comment: Option<String>,
        pub gift_message: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod has_bad_field_type {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "has_bad_field_types")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub field_good: Option<String>,
        pub field_bad: Option<Vec<u8>>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub fn registry() -> Result<Arc<CollectionRegistry>, QueryError> {
    RegistryBuilder::new()
        .collection(
            CollectionDef::from_entity::<user::Entity>("user")
                .association(Association::has_many("addresses", "address", "user_id")),
        )
        .collection(
            CollectionDef::from_entity::<address::Entity>("address").association(
                Association::from_relation("user", "user", &address::Relation::User.def())?,
            ),
        )
        .collection(CollectionDef::from_entity::<bike::Entity>("bike"))
        .collection(CollectionDef::from_entity::<log::Entity>("log"))
        .collection(
            CollectionDef::from_entity::<order::Entity>("order").search_fields(["amount", "comment"]),
        )
        .collection(CollectionDef::from_entity::<has_bad_field_type::Entity>(
            "hasBadFieldType",
        ))
        .build()
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let statement = Schema::new(backend).create_table_from_entity(entity);
    db.execute(backend.build(&statement)).await?;
    Ok(())
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    // Captured per test; only shown for failures
    let _ = tracing_subscriber::fmt()
        .with_env_filter("adminlens=debug")
        .with_test_writer()
        .try_init();
    let db = Database::connect("sqlite::memory:").await?;
    create_table(&db, user::Entity).await?;
    create_table(&db, address::Entity).await?;
    create_table(&db, bike::Entity).await?;
    create_table(&db, log::Entity).await?;
    create_table(&db, order::Entity).await?;
    create_table(&db, has_bad_field_type::Entity).await?;
    Ok(db)
}

/// Four users (ids 100 to 103), Richard's three addresses, one bike, one log
/// with a composite key and two orders
pub async fn setup_fixtures() -> Result<DatabaseConnection, DbErr> {
    let db = setup_test_db().await?;
    let now = Utc::now();

    let users = [
        (100, "richard@piedpiper.com", "Richard", "Hendricks", Some(RICHARD_UUID)),
        (101, "dinesh@piedpiper.com", "Dinesh", "Chugtai", None),
        (102, "gilfoyle@piedpiper.com", "Bertram", "Gilfoyle", None),
        (103, "erlich@aviato.com", "Erlich", "Bachman", None),
    ];
    for (id, email, first_name, last_name, uuid) in users {
        user::ActiveModel {
            id: Set(id),
            email: Set(email.to_string()),
            email_valid: Set(None),
            first_name: Set(Some(first_name.to_string())),
            last_name: Set(Some(last_name.to_string())),
            username: Set(None),
            password: Set(None),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            reset_password_token: Set(None),
            uuid: Set(uuid.map(|u| Uuid::parse_str(u).expect("fixture uuid"))),
        }
        .insert(&db)
        .await?;
    }

    let addresses = [
        (1, "Hooli Street", "94103", "SF", Some("USA")),
        (2, "Rue de Rivoli", "75001", "Paris", Some("France")),
        (3, "University Ave", "94301", "Palo Alto", None),
    ];
    for (id, line, zip_code, city, country) in addresses {
        address::ActiveModel {
            id: Set(id),
            line: Set(Some(line.to_string())),
            zip_code: Set(Some(zip_code.to_string())),
            city: Set(Some(city.to_string())),
            country: Set(country.map(str::to_string)),
            user_id: Set(Some(100)),
        }
        .insert(&db)
        .await?;
    }

    bike::ActiveModel {
        id: Set(Uuid::parse_str(RICHARD_UUID).expect("fixture uuid")),
        name: Set("Fixie".to_string()),
        created_at: Set(Some(now)),
    }
    .insert(&db)
    .await?;

    log::ActiveModel {
        code: Set("G@G#F@G@".to_string()),
        trace: Set("Ggg23g242@".to_string()),
        stack: Set(None),
    }
    .insert(&db)
    .await?;

    let orders = [
        (1, 100, "gift for Richard", None),
        (2, 250, "standard delivery", Some("gift wrapped")),
    ];
    for (id, amount, comment, gift_message) in orders {
        order::ActiveModel {
            id: Set(id),
            amount: Set(Some(amount)),
            comment: Set(Some(comment.to_string())),
            gift_message: Set(gift_message.map(str::to_string)),
        }
        .insert(&db)
        .await?;
    }

    Ok(db)
}
