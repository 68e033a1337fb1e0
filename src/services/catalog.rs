use crate::{
    entities::{product, Product, ProductModel},
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Price and display data copied into a cart line at insert time.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub name: String,
    pub unit_price: Decimal,
    pub image_url: Option<String>,
}

/// Product lookup collaborator. Consulted only when a line is inserted;
/// later cart reads see the frozen copy.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn get_product(&self, product_id: Uuid) -> Result<ProductInfo, ServiceError>;
}

/// Catalog service backed by the products table.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            unit_price: Set(input.unit_price),
            image_url: Set(input.image_url),
            active: Set(true),
            created_at: Set(Utc::now()),
        };

        Ok(model.insert(&*self.db).await?)
    }
}

#[async_trait]
impl ProductLookup for CatalogService {
    async fn get_product(&self, product_id: Uuid) -> Result<ProductInfo, ServiceError> {
        let product = Product::find_by_id(product_id)
            .filter(product::Column::Active.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {} not found", product_id)))?;

        Ok(ProductInfo {
            name: product.name,
            unit_price: product.unit_price,
            image_url: product.image_url,
        })
    }
}

/// Input for creating a catalog product
#[derive(Debug, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    pub unit_price: Decimal,
    pub image_url: Option<String>,
}
