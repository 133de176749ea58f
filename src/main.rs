use std::{thread, time::Duration};

use tokenwait::{
    AuthMetadataContext, BackgroundCredentials, CredentialsError, Delivery, FetchOptions,
    MetadataArray, MetadataEntry, StaticTokenCredentials, fetch_oauth2_token_with_credentials,
    fetch_oauth2_token_with_options,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let token = fetch_oauth2_token_with_credentials(&StaticTokenCredentials::new("token_123"));
    println!("Token: {token:?}");

    let slow = BackgroundCredentials::new(|context: &AuthMetadataContext| {
        // Do your OAuth call here
        thread::sleep(Duration::from_millis(200));
        Ok::<_, CredentialsError>(MetadataArray::from(vec![MetadataEntry::bearer(&format!(
            "token_for_{}",
            context.method_name()
        ))]))
    })
    .with_delivery(Delivery::Pollset);

    let options = FetchOptions::builder()
        .context(
            AuthMetadataContext::builder()
                .service_url("https://example.com/demo.Service")
                .method_name("Refresh")
                .build(),
        )
        .deadline(Duration::from_secs(5))
        .build();
    let token = fetch_oauth2_token_with_options(&slow, &options);
    println!("Token: {token:?}");
}
