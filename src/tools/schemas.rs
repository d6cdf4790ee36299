//! Tool schemas advertised to the model per agent role
//!
//! JSON-function-calling shape. Which set a call gets depends on the
//! resolved personality; customer support is the default.

use serde_json::json;

use crate::realtime::session::ToolSchema;

/// Tools for customer support agents (the default set).
pub fn customer_support_tools() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new(
            "lookup_customer",
            "Look up customer information by phone number or email address",
            json!({
                "type": "object",
                "properties": {
                    "phone_number": {
                        "type": "string",
                        "description": "Customer phone number",
                    },
                    "email": {
                        "type": "string",
                        "description": "Customer email address",
                    },
                },
            }),
        ),
        ToolSchema::new(
            "search_knowledge_base",
            "Search the knowledge base for information to help answer customer questions",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query",
                    },
                    "category": {
                        "type": "string",
                        "description": "Optional category to filter results",
                    },
                },
                "required": ["query"],
            }),
        ),
        ToolSchema::new(
            "check_order_status",
            "Check the status of a customer order",
            json!({
                "type": "object",
                "properties": {
                    "order_id": {
                        "type": "string",
                        "description": "Order ID or tracking number",
                    },
                },
                "required": ["order_id"],
            }),
        ),
        ToolSchema::new(
            "create_support_ticket",
            "Create a support ticket for issues that cannot be resolved immediately",
            json!({
                "type": "object",
                "properties": {
                    "subject": {
                        "type": "string",
                        "description": "Ticket subject",
                    },
                    "description": {
                        "type": "string",
                        "description": "Detailed description of the issue",
                    },
                    "priority": {
                        "type": "string",
                        "description": "Ticket priority",
                        "enum": ["low", "medium", "high", "urgent"],
                    },
                },
                "required": ["subject", "description"],
            }),
        ),
        ToolSchema::new(
            "schedule_appointment",
            "Schedule a follow-up appointment or consultation",
            json!({
                "type": "object",
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "Date in YYYY-MM-DD format",
                    },
                    "time": {
                        "type": "string",
                        "description": "Time in HH:MM format",
                    },
                    "service_type": {
                        "type": "string",
                        "description": "Type of service",
                    },
                },
                "required": ["date", "time", "service_type"],
            }),
        ),
        ToolSchema::new(
            "escalate_to_human",
            "Escalate the call to a human agent when the customer requests it or the issue is too complex",
            json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Reason for escalation",
                        "enum": ["complex_issue", "customer_request", "technical_problem"],
                    },
                    "priority": {
                        "type": "string",
                        "description": "Escalation priority",
                        "enum": ["low", "medium", "high", "urgent"],
                    },
                },
                "required": ["reason"],
            }),
        ),
        ToolSchema::new(
            "get_business_hours",
            "Get current business hours and availability",
            json!({
                "type": "object",
                "properties": {},
            }),
        ),
    ]
}

/// Tools for sales agents.
pub fn sales_tools() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new(
            "lookup_customer",
            "Look up customer information",
            json!({
                "type": "object",
                "properties": {
                    "phone_number": { "type": "string" },
                    "email": { "type": "string" },
                },
            }),
        ),
        ToolSchema::new(
            "schedule_appointment",
            "Schedule a sales appointment or consultation",
            json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": "Date in YYYY-MM-DD format" },
                    "time": { "type": "string", "description": "Time in HH:MM format" },
                    "service_type": { "type": "string", "description": "Type of service" },
                },
                "required": ["date", "time", "service_type"],
            }),
        ),
        ToolSchema::new(
            "search_knowledge_base",
            "Search product information and pricing",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "category": { "type": "string" },
                },
                "required": ["query"],
            }),
        ),
    ]
}

/// Tools for appointment booking agents.
pub fn appointment_tools() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new(
            "lookup_customer",
            "Look up customer information",
            json!({
                "type": "object",
                "properties": {
                    "phone_number": { "type": "string" },
                    "email": { "type": "string" },
                },
            }),
        ),
        ToolSchema::new(
            "schedule_appointment",
            "Schedule an appointment",
            json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string" },
                    "time": { "type": "string" },
                    "service_type": { "type": "string" },
                },
                "required": ["date", "time", "service_type"],
            }),
        ),
        ToolSchema::new(
            "get_business_hours",
            "Get available appointment times",
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}

/// Resolve a named tool set; unknown names fall back to customer
/// support.
pub fn toolset_by_name(name: &str) -> Vec<ToolSchema> {
    match name {
        "sales" => sales_tools(),
        "appointment" => appointment_tools(),
        _ => customer_support_tools(),
    }
}
