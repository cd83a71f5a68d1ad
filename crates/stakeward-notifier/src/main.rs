use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use redis::Msg;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use stakeward_platform::redis_bus::{
    BUDDY_REQUESTS_CHANNEL, PAYMENTS_CHANNEL, SETTLEMENTS_CHANNEL,
};
use stakeward_platform::{
    BuddyRequestedEvent, PaymentSucceededEvent, RedisBus, ServiceConfig, SettlementCompletedEvent,
    connect_database,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "stakeward_notifier=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(SETTLEMENTS_CHANNEL).await?;
    pubsub.subscribe(BUDDY_REQUESTS_CHANNEL).await?;
    pubsub.subscribe(PAYMENTS_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    info!("notifier subscribed to settlement, buddy and payment channels");

    loop {
        let msg = messages
            .next()
            .await
            .context("notification stream ended unexpectedly")?;
        if let Err(err) = handle_message(&pool, msg).await {
            error!("failed to process message: {err:#}");
        }
    }
}

async fn handle_message(pool: &PgPool, msg: Msg) -> Result<()> {
    let channel = msg.get_channel_name().to_string();
    let payload: String = msg.get_payload()?;

    let notification = match channel.as_str() {
        SETTLEMENTS_CHANNEL => {
            let event: SettlementCompletedEvent = serde_json::from_str(&payload)?;
            render_settlement(&event)
        }
        BUDDY_REQUESTS_CHANNEL => {
            let event: BuddyRequestedEvent = serde_json::from_str(&payload)?;
            render_buddy_request(&event)
        }
        PAYMENTS_CHANNEL => {
            let event: PaymentSucceededEvent = serde_json::from_str(&payload)?;
            render_payment_receipt(&event)
        }
        other => {
            info!(channel = other, "ignoring message on unexpected channel");
            return Ok(());
        }
    };

    insert_notification(pool, &notification).await?;
    info!(kind = %notification.kind, recipient = %notification.recipient, "notification queued");
    Ok(())
}

struct Notification {
    kind: String,
    recipient: String,
    subject: String,
    body: String,
}

fn render_settlement(event: &SettlementCompletedEvent) -> Notification {
    let (subject, body) = match event.outcome.as_str() {
        "success" => (
            format!("You did it: {}", event.title),
            format!(
                "Your commitment \"{}\" is complete. {} of your {} stake is on its way back to you.",
                event.title, event.refund_amount, event.stake
            ),
        ),
        _ => (
            format!("Commitment not met: {}", event.title),
            format!(
                "Your commitment \"{}\" was not completed in time. {} of your {} stake will be donated to {}.",
                event.title,
                event.donation_amount,
                event.stake,
                event.charity_id.as_deref().unwrap_or("your chosen charity"),
            ),
        ),
    };

    Notification {
        kind: format!("settlement.{}", event.outcome),
        recipient: event.user_id.to_string(),
        subject,
        body,
    }
}

fn render_buddy_request(event: &BuddyRequestedEvent) -> Notification {
    Notification {
        kind: "buddy.request".to_string(),
        recipient: event.buddy_email.clone(),
        subject: format!("Can you vouch for \"{}\"?", event.title),
        body: format!(
            "You have been asked to confirm whether the commitment \"{}\" was completed. \
             Use this link before {}: /buddy/{}",
            event.title,
            event.expires_at.format("%Y-%m-%d"),
            event.token
        ),
    }
}

fn render_payment_receipt(event: &PaymentSucceededEvent) -> Notification {
    Notification {
        kind: "payment.receipt".to_string(),
        recipient: event.user_id.to_string(),
        subject: "Your stake is in place".to_string(),
        body: format!(
            "We received your stake of {} {}. It will be refunded minus the platform fee when \
             you complete your commitment.",
            event.amount,
            event.currency.to_uppercase()
        ),
    }
}

async fn insert_notification(pool: &PgPool, notification: &Notification) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notifications (id, kind, recipient, subject, body, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&notification.kind)
    .bind(&notification.recipient)
    .bind(&notification.subject)
    .bind(&notification.body)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
