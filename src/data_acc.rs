// Copyright (C) 2025-2026 The Tsunagi Authors. All Rights Reserved.
// This program is free software under MIT License.
// See the file LICENSE in this distribution for more details.

use crate::{DataAcc, DataConn, DataHub};

impl DataAcc for DataHub {
    fn get_conn<C: DataConn + 'static>(&mut self, name: impl AsRef<str>) -> errs::Result<&mut C> {
        DataHub::get_conn(self, name)
    }
}
