use fxstream::{
    builder, drive, EventHandler, QuantitySpec, ReconnectPolicy, Response, StreamConfig,
    Subscription,
};
use rust_decimal::Decimal;
use std::time::Duration;

/// Prints every price level it receives
struct PricePrinter {
    updates: u64,
}

impl EventHandler for PricePrinter {
    fn on_authenticated(&mut self, _response: &Response) {
        println!("🔐 Authenticated");
    }

    fn on_authentication_failed(&mut self, response: &Response) {
        println!("❌ Authentication failed: {}", response.body);
    }

    fn on_connection_lost(&mut self, reason: &str) {
        println!("⚠️ Connection lost: {}", reason);
    }

    fn on_subscribe_result(&mut self, response: &Response) {
        println!(
            "📬 Subscribe {:?}: {:?}",
            response.request_id, response.status
        );
    }

    fn on_data_result(&mut self, response: &Response) {
        println!("📋 Data: {}", response.body);
    }

    fn on_stream(&mut self, response: &Response) {
        match response.price_updates() {
            Ok(updates) => {
                for update in updates {
                    self.updates += 1;
                    println!(
                        "📊 {}/{} {} {}: buy {:?} sell {:?}",
                        update.base_token,
                        update.quote_token,
                        update.quantity,
                        update.quantity_token,
                        update.buy_price,
                        update.sell_price
                    );
                }
            }
            Err(e) => println!("⚠️ Unreadable stream body: {}", e),
        }
    }

    fn on_error(&mut self, response: &Response) {
        println!("❌ Error response: {} {:?}", response.body, response.error);
    }

    fn on_malformed(&mut self, reason: &str, raw: &str) {
        println!("⚠️ Malformed frame ({}): {}", reason, raw);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    println!("🚀 Starting price stream demo");

    // FX_STREAM_API_KEY, FX_STREAM_SECRET_KEY, FX_STREAM_PASSPHRASE, FX_STREAM_HOST
    let config = StreamConfig::from_env_file("FX_STREAM")?;

    let (session, reconnector) = builder()
        .with_config(config)
        .with_reconnect_policy(ReconnectPolicy::default().with_max_attempts(5))
        .build_with_reconnection()?;

    let mut printer = PricePrinter { updates: 0 };
    let events = session.events();
    let printer_task = tokio::spawn(async move {
        drive(events, &mut printer).await;
        printer.updates
    });

    reconnector
        .declare(Subscription::new(
            "BTC",
            "USD",
            QuantitySpec::new("BTC", vec![Decimal::new(1, 1), Decimal::ONE]),
        ))
        .await;
    reconnector.start().await;
    reconnector.establish().await?;
    session.fetch_data("max_levels", "levels_1").await?;

    tokio::time::sleep(Duration::from_secs(30)).await;

    println!("🛑 Shutting down");
    reconnector.shutdown().await?;
    drop(reconnector);
    drop(session);

    let updates = printer_task.await?;
    println!("✅ Received {} price updates", updates);
    Ok(())
}
