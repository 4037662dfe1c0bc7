use crate::payments::error::PaymentResult;
use crate::payments::types::{CollectionRequest, CollectionResponse, CollectionStatus, ProviderName};
use async_trait::async_trait;

/// A mobile-money collection provider.
///
/// Implementations perform exactly one upstream call per method invocation
/// for status checks; retry policy belongs to the caller.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Asks the customer's wallet to approve a collection.
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse>;

    /// Looks up a collection by provider transaction id.
    ///
    /// Very recent transactions may not be visible yet and come back as
    /// [`crate::payments::error::PaymentError::NotFound`].
    async fn get_collection_status(&self, transaction_id: &str) -> PaymentResult<CollectionStatus>;

    fn name(&self) -> ProviderName;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider;

    #[async_trait]
    impl PaymentProvider for EchoProvider {
        async fn initiate_collection(
            &self,
            request: CollectionRequest,
        ) -> PaymentResult<CollectionResponse> {
            Ok(CollectionResponse {
                transaction_id: Some(format!("tx-{}", request.reference)),
                status: Some("pending".to_string()),
                amount: Some(request.amount),
                provider_data: None,
            })
        }

        async fn get_collection_status(
            &self,
            transaction_id: &str,
        ) -> PaymentResult<CollectionStatus> {
            Ok(CollectionStatus {
                provider_status: Some("successful".to_string()),
                provider_reference: Some(transaction_id.to_string()),
                ..CollectionStatus::default()
            })
        }

        fn name(&self) -> ProviderName {
            ProviderName::Sandbox
        }
    }

    #[tokio::test]
    async fn trait_is_object_safe() {
        let provider: Box<dyn PaymentProvider> = Box::new(EchoProvider);
        let response = provider
            .initiate_collection(CollectionRequest::voucher_purchase(
                "+256700000001",
                1000,
                "ref-1",
            ))
            .await
            .expect("initiation should succeed");
        assert_eq!(response.transaction_id.as_deref(), Some("tx-ref-1"));

        let status = provider
            .get_collection_status("tx-ref-1")
            .await
            .expect("status should succeed");
        assert_eq!(status.provider_status.as_deref(), Some("successful"));
    }
}
