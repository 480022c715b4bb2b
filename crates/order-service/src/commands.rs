//! Subcommands of the order service binary.
//!
//! Each command runs against an [`OrderService`] and returns the text to print,
//! which keeps the commands testable without capturing stdout.

use chrono::Utc;
use clap::Subcommand;
use order_core::{OperationError, OrderService};
use order_types::{Order, OrderEvent, OrderId};
use serde::Serialize;

/// Operations exposed on the command line.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
	/// Run create -> pay -> fulfill, then show that cancel is rejected
	Demo,
	/// Create a new order
	Create,
	/// Record the payment of an order
	Pay {
		/// Order id
		id: OrderId,
		/// Payment confirmation number (random UUID when omitted)
		#[arg(long)]
		confirmation: Option<String>,
	},
	/// Fulfill a paid order
	Fulfill {
		/// Order id
		id: OrderId,
	},
	/// Cancel an order that has not been fulfilled
	Cancel {
		/// Order id
		id: OrderId,
	},
	/// Show an order and the events it accepts
	Show {
		/// Order id
		id: OrderId,
	},
}

/// Order as printed by `show`.
#[derive(Serialize)]
struct OrderView<'a> {
	#[serde(flatten)]
	order: &'a Order,
	legal_events: Vec<OrderEvent>,
}

/// Runs `command` and returns its output.
pub async fn run(
	command: Command,
	service: &OrderService,
) -> Result<String, Box<dyn std::error::Error>> {
	let output = match command {
		Command::Demo => return demo(service).await,
		Command::Create => render(&service.create(Utc::now()).await?)?,
		Command::Pay { id, confirmation } => {
			let confirmation = confirmation.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
			render(&service.pay(id, &confirmation).await?)?
		},
		Command::Fulfill { id } => render(&service.fulfill(id).await?)?,
		Command::Cancel { id } => render(&service.cancel(id).await?)?,
		Command::Show { id } => {
			let order = service.by_id(id).await?;
			render(&OrderView {
				legal_events: service.legal_events(order.state),
				order: &order,
			})?
		},
	};
	Ok(output)
}

/// Walks a fresh order through its lifecycle and reports every step.
async fn demo(service: &OrderService) -> Result<String, Box<dyn std::error::Error>> {
	let mut events = service.subscribe();

	let order = service.create(Utc::now()).await?;
	tracing::info!(order_id = %order.id, state = %order.state, "Demo order created");

	let confirmation = uuid::Uuid::new_v4().to_string();
	let order = service.pay(order.id, &confirmation).await?;
	tracing::info!(order_id = %order.id, state = %order.state, payment_number = %confirmation, "Demo order paid");

	let order = service.fulfill(order.id).await?;
	tracing::info!(order_id = %order.id, state = %order.state, "Demo order fulfilled");

	match service.cancel(order.id).await {
		Err(OperationError::IllegalTransition { from, event }) => {
			tracing::info!(order_id = %order.id, %from, %event, "Cancel rejected as expected");
		},
		Err(e) => return Err(e.into()),
		Ok(unexpected) => {
			return Err(format!("cancel of fulfilled order {} succeeded", unexpected.id).into())
		},
	}

	while let Ok(event) = events.try_recv() {
		tracing::debug!(order_id = %event.order_id(), ?event, "Lifecycle event");
	}

	Ok(render(&service.by_id(order.id).await?)?)
}

fn render<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
	serde_json::to_string_pretty(value)
}
